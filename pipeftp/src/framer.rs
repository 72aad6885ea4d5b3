//! # Framer
//!
//! Recovers CRLF-delimited lines from the arbitrary chunks a stream delivers.
//!
//! Bytes are buffered undecoded, so a multi-byte character split across two reads is
//! decoded once the whole line is available. Splitting the input differently never
//! changes the emitted lines.

use crate::{FtpError, FtpResult};

/// Default bound for the unterminated tail of the buffer
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

const CRLF: &[u8] = b"\r\n";

/// Line framer for one connection
#[derive(Debug, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_pending: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    /// Creates a framer which fails once more than `max_pending` bytes are waiting for a terminator
    pub fn new(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_pending,
        }
    }

    /// Appends `bytes` and returns the lines completed so far.
    ///
    /// Lines are extracted lazily: the ones not consumed from the iterator stay
    /// buffered and come out first on the next call.
    /// If the unterminated tail grows beyond the limit the buffer is discarded and
    /// [`FtpError::FramingError`] is returned; the connection can't be trusted anymore.
    pub fn feed(&mut self, bytes: &[u8]) -> FtpResult<Lines<'_>> {
        self.buffer.extend_from_slice(bytes);
        let tail = match self.buffer.windows(2).rposition(|w| w == CRLF) {
            Some(pos) => self.buffer.len() - (pos + CRLF.len()),
            None => self.buffer.len(),
        };
        if tail > self.max_pending {
            error!(
                "{} bytes pending without line terminator (limit {})",
                tail, self.max_pending
            );
            self.buffer.clear();
            return Err(FtpError::FramingError {
                limit: self.max_pending,
            });
        }
        Ok(Lines { framer: self })
    }

    /// Amount of bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any buffered byte
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buffer.windows(2).position(|w| w == CRLF)?;
            let line = String::from_utf8_lossy(&self.buffer[..pos]).trim().to_string();
            self.buffer.drain(..pos + CRLF.len());
            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}

/// Lines completed by the last [`LineFramer::feed`]
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;
    use rand::Rng;

    use super::*;

    fn feed_all(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<String> {
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(framer.feed(chunk).unwrap());
        }
        lines
    }

    #[test]
    fn should_frame_single_chunk() {
        let mut framer = LineFramer::default();
        let lines: Vec<String> = framer
            .feed(b"220 Service ready\r\n331 Password required\r\n")
            .unwrap()
            .collect();
        assert_eq!(lines, vec!["220 Service ready", "331 Password required"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn should_retain_unterminated_tail() {
        let mut framer = LineFramer::default();
        let lines = feed_all(&mut framer, &[b"220 Serv", b"ice ready\r", b"\n230 Lo"]);
        assert_eq!(lines, vec!["220 Service ready"]);
        assert_eq!(framer.pending(), 6);
        let lines = feed_all(&mut framer, &[b"gged in\r\n"]);
        assert_eq!(lines, vec!["230 Logged in"]);
    }

    #[test]
    fn should_drop_empty_lines_and_trim() {
        let mut framer = LineFramer::default();
        let lines = feed_all(&mut framer, &[b"\r\n   \r\n  220 ready  \r\n\r\n"]);
        assert_eq!(lines, vec!["220 ready"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn should_not_split_on_bare_lf() {
        let mut framer = LineFramer::default();
        let lines = feed_all(&mut framer, &[b"220 a\nb\r\n"]);
        assert_eq!(lines, vec!["220 a\nb"]);
    }

    #[test]
    fn should_keep_unconsumed_lines_for_next_feed() {
        let mut framer = LineFramer::default();
        let first = framer.feed(b"220 one\r\n221 two\r\n").unwrap().next();
        assert_eq!(first.as_deref(), Some("220 one"));
        let rest: Vec<String> = framer.feed(b"").unwrap().collect();
        assert_eq!(rest, vec!["221 two"]);
    }

    #[test]
    fn should_decode_multibyte_split_across_chunks() {
        let text = "250 фообар.txt\r\n".as_bytes();
        let mut framer = LineFramer::default();
        let lines = feed_all(&mut framer, &[&text[..6], &text[6..]]);
        assert_eq!(lines, vec!["250 фообар.txt"]);
    }

    #[test]
    fn should_fail_when_tail_exceeds_limit() {
        let mut framer = LineFramer::new(16);
        assert!(framer.feed(b"0123456789").is_ok());
        assert!(matches!(
            framer.feed(b"0123456789"),
            Err(FtpError::FramingError { limit: 16 })
        ));
        assert_eq!(framer.pending(), 0);
        // terminated content doesn't count against the limit
        let mut framer = LineFramer::new(16);
        let lines: Vec<String> = framer.feed(b"220 a\r\n0123456789").unwrap().collect();
        assert_eq!(lines, vec!["220 a"]);
    }

    #[test]
    fn should_be_invariant_to_chunk_boundaries() {
        let lines = [
            "220-Welcome to the server",
            "",
            "220 Service ready",
            "331 Password required for omar",
            "230 Logged in",
            "227 Entering Passive Mode (192,168,1,100,4,223)",
            "150 Here comes the directory listing",
            "226 Транзакция завершена",
        ];
        let mut encoded = String::new();
        for line in lines.iter() {
            encoded.push_str(line);
            encoded.push_str("\r\n");
        }
        let bytes = encoded.as_bytes();
        let expected: Vec<String> = LineFramer::default().feed(bytes).unwrap().collect();
        assert_eq!(
            expected,
            lines
                .iter()
                .filter(|l| !l.is_empty())
                .map(|l| l.to_string())
                .collect::<Vec<String>>()
        );

        let mut rng = rand::rng();
        for _ in 0..256 {
            let mut framer = LineFramer::default();
            let mut got = Vec::new();
            let mut offset = 0;
            while offset < bytes.len() {
                let len = rng.random_range(1..=(bytes.len() - offset).min(7));
                got.extend(framer.feed(&bytes[offset..offset + len]).unwrap());
                offset += len;
            }
            assert_eq!(got, expected);
            assert_eq!(framer.pending(), 0);
        }
    }
}
