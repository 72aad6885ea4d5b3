//! # Passive
//!
//! Resolves the data connection address announced by a PASV reply

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::{FtpError, FtpResult};

/// Extracts `(h1,h2,h3,h4,p1,p2)` from a reply message.
///
/// The text between the first `(` and the first `)` after it must be exactly six
/// comma separated decimal bytes; anything else is an error, never a partial result.
///
/// ```rust
/// let addr = pipeftp::passive::resolve("Entering Passive Mode (192,168,1,100,4,223)").unwrap();
/// assert_eq!(addr.ip().to_string(), "192.168.1.100");
/// assert_eq!(addr.port(), 1247);
/// ```
pub fn resolve(message: &str) -> FtpResult<SocketAddrV4> {
    let open = message
        .find('(')
        .ok_or_else(|| FtpError::PassiveAddress(format!("no address tuple in {message:?}")))?;
    let close = message[open..]
        .find(')')
        .map(|offset| open + offset)
        .ok_or_else(|| FtpError::PassiveAddress(format!("unterminated tuple in {message:?}")))?;
    let tuple = &message[open + 1..close];

    let octets = tuple
        .split(',')
        .map(|token| parse_byte(token, tuple))
        .collect::<FtpResult<Vec<u8>>>()?;
    let [h1, h2, h3, h4, p1, p2] = octets[..] else {
        return Err(FtpError::PassiveAddress(format!(
            "expected 6 numbers, got {} in ({tuple})",
            octets.len()
        )));
    };
    let addr = SocketAddrV4::new(
        Ipv4Addr::new(h1, h2, h3, h4),
        u16::from(p1) * 256 + u16::from(p2),
    );
    trace!("Passive address: {}", addr);
    Ok(addr)
}

fn parse_byte(token: &str, tuple: &str) -> FtpResult<u8> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FtpError::PassiveAddress(format!(
            "bad token {token:?} in ({tuple})"
        )));
    }
    token
        .parse::<u8>()
        .map_err(|_| FtpError::PassiveAddress(format!("{token} is out of range in ({tuple})")))
}
