//! # Parser
//!
//! Turns framed lines into [`Response`]s

use crate::{FtpError, FtpResult, Response};

/// Parse one framed line as `<3-digit code><sep><message>`.
///
/// `sep` is a space for a final line or a hyphen for the first line of a multi-line reply.
/// The code is not validated against any registry.
pub fn parse(line: &str) -> FtpResult<Response> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(FtpError::BadResponse(line.to_string()));
    }
    let code = line[..3]
        .parse::<u32>()
        .map_err(|_| FtpError::BadResponse(line.to_string()))?;
    let multiline = match bytes[3] {
        b' ' => false,
        b'-' => true,
        _ => return Err(FtpError::BadResponse(line.to_string())),
    };
    Ok(Response {
        code,
        message: line[4..].to_string(),
        raw: line.to_string(),
        multiline,
    })
}

/// Outcome of [`ResponseParser::parse_line`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Response(Response),
    /// A line inside a multi-line reply, between the `NNN-` and the `NNN ` lines
    Continuation(String),
}

/// Stateful parser for a control connection.
///
/// It only detects multi-line replies, so their inner text lines aren't mistaken for
/// malformed responses; it doesn't stitch them together.
#[derive(Debug, Default, Clone)]
pub struct ResponseParser {
    continuation: Option<u32>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> FtpResult<Parsed> {
        if let Some(code) = self.continuation {
            if !line.starts_with(&format!("{code} ")) {
                trace!("CC IN (continuation): {:?}", line);
                return Ok(Parsed::Continuation(line.to_string()));
            }
            self.continuation = None;
        }
        let response = parse(line)?;
        if response.multiline {
            self.continuation = Some(response.code);
        }
        Ok(Parsed::Response(response))
    }

    /// Whether a multi-line reply is open
    pub fn in_continuation(&self) -> bool {
        self.continuation.is_some()
    }

    pub fn reset(&mut self) {
        self.continuation = None;
    }
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn should_parse_single_line() {
        let response = parse("220 Service ready").unwrap();
        assert_eq!(response.code, 220);
        assert_eq!(response.message.as_str(), "Service ready");
        assert_eq!(response.raw.as_str(), "220 Service ready");
        assert_eq!(response.multiline, false);
    }

    #[test]
    fn should_parse_pasv_response() {
        let response = parse("227 Entering Passive Mode (192,168,1,100,4,223)").unwrap();
        assert_eq!(response.code, 227);
        assert_eq!(
            response.message.as_str(),
            "Entering Passive Mode (192,168,1,100,4,223)"
        );
    }

    #[test]
    fn should_parse_multiline_first_line() {
        let response = parse("230-Welcome aboard").unwrap();
        assert_eq!(response.code, 230);
        assert_eq!(response.message.as_str(), "Welcome aboard");
        assert!(response.multiline);
    }

    #[test]
    fn should_pass_unknown_codes_through() {
        assert_eq!(parse("999 who knows").unwrap().code, 999);
        assert_eq!(parse("000 ").unwrap().message.as_str(), "");
    }

    #[test]
    fn should_reject_malformed_lines() {
        assert!(matches!(parse(""), Err(FtpError::BadResponse(_))));
        assert!(matches!(parse("220"), Err(FtpError::BadResponse(_))));
        assert!(matches!(parse("abc Ready"), Err(FtpError::BadResponse(_))));
        assert!(matches!(parse("2x0 Ready"), Err(FtpError::BadResponse(_))));
        assert!(matches!(parse("+22 Ready"), Err(FtpError::BadResponse(_))));
        assert!(matches!(parse("2200 Ready"), Err(FtpError::BadResponse(_))));
        assert!(matches!(parse("22é Ready"), Err(FtpError::BadResponse(_))));
    }

    #[test]
    fn should_detect_multiline_continuation() {
        let mut parser = ResponseParser::new();
        assert!(matches!(
            parser.parse_line("220-Welcome").unwrap(),
            Parsed::Response(Response { code: 220, .. })
        ));
        assert!(parser.in_continuation());
        assert_eq!(
            parser.parse_line("  this is a banner").unwrap(),
            Parsed::Continuation(String::from("  this is a banner"))
        );
        assert_eq!(
            parser.parse_line("220-still banner").unwrap(),
            Parsed::Continuation(String::from("220-still banner"))
        );
        match parser.parse_line("220 Ready").unwrap() {
            Parsed::Response(response) => {
                assert_eq!(response.code, 220);
                assert!(!response.multiline);
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert!(!parser.in_continuation());
        assert!(parser.parse_line("garbage").is_err());
    }
}
