//! # List
//!
//! This module exposes the parser for the LIST command output received on the data connection.
//! There's no specification regarding the LIST command output, so it depends on the remote server.
//! Lines are tried as POSIX `ls -l` first, then as DOS, then with a loose fallback which only
//! recognizes directories and names.
//!
//! ```rust
//! use pipeftp::list::{parse_listing, ItemKind};
//!
//! let items = parse_listing("total 1\r\ndrwxr-xr-x 2 0 0 4096 Nov 5 2018 pub\r\n");
//! assert_eq!(items.len(), 1);
//! assert_eq!(items[0].name.as_str(), "pub");
//! assert_eq!(items[0].kind, ItemKind::Directory);
//! ```

use std::convert::TryFrom;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use chrono::prelude::{NaiveDate, NaiveDateTime, Utc};
use chrono::Datelike;
use lazy_regex::{Lazy, Regex};
use thiserror::Error;

// -- Regex

/// POSIX system regex to parse list output
static POSIX_LS_RE: Lazy<Regex> = lazy_regex!(
    r#"^([\-ld])([\-rwxsStT]{9})\s+(\d+)\s+([^ ]+)\s+([^ ]+)\s+(\d+)\s+([^ ]+\s+\d{1,2}\s+(?:\d{1,2}:\d{1,2}|\d{4}))\s+(.+)$"#
);
/// DOS system regex to parse list output
static DOS_LS_RE: Lazy<Regex> =
    lazy_regex!(r#"^(\d{2}\-\d{2}\-\d{2}\s+\d{2}:\d{2}\s*[AP]M)\s+(<DIR>)?([\d,]*)\s+(.+)$"#);

/// Whether an entry is a directory or anything else
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ItemKind {
    File,
    Directory,
}

/// A directory entry parsed from a listing.
///
/// Size and modification time are only known for recognized formats.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ListingItem {
    pub name: String,
    pub kind: ItemKind,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
}

// -- Error

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("Syntax error: invalid line")]
    SyntaxError,
    #[error("Invalid date")]
    InvalidDate,
    #[error("Bad file size")]
    BadSize,
}

/// Parse a whole listing payload.
///
/// Blank lines and `total N` headers are skipped, as are lines no parser understands.
pub fn parse_listing(text: &str) -> Vec<ListingItem> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !is_total_line(line))
        .filter_map(|line| match ListingItem::try_from(line) {
            Ok(item) => Some(item),
            Err(err) => {
                debug!("skipping listing line {:?}: {}", line, err);
                None
            }
        })
        .collect()
}

fn is_total_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    matches!(
        (tokens.next(), tokens.next(), tokens.next()),
        (Some("total"), Some(n), None) if n.bytes().all(|b| b.is_ascii_digit())
    )
}

impl ListingItem {
    pub fn is_directory(&self) -> bool {
        self.kind == ItemKind::Directory
    }

    /// Parse a POSIX LIST output line and if it is valid, return a `ListingItem`.
    /// Symlinks are reported as files named after the link itself.
    pub fn from_posix_line(line: &str) -> Result<Self, ParseError> {
        let metadata = POSIX_LS_RE
            .captures(line)
            .ok_or(ParseError::SyntaxError)?;
        trace!("Parsed POSIX line {}", line);
        // NOTE: metadata fmt: (regex, file_type, permissions, link_count, uid, gid, filesize, mtime, filename)
        let (Some(file_type), Some(size), Some(mtime), Some(name)) = (
            metadata.get(1),
            metadata.get(6),
            metadata.get(7),
            metadata.get(8),
        ) else {
            return Err(ParseError::SyntaxError);
        };
        let kind = match file_type.as_str() {
            "d" => ItemKind::Directory,
            _ => ItemKind::File,
        };
        let modified = parse_lstime(mtime.as_str().trim(), "%b %d %Y", "%b %d %H:%M")?;
        let size = size
            .as_str()
            .parse::<u64>()
            .map_err(|_| ParseError::BadSize)?;
        let name = match file_type.as_str() {
            "l" => name.as_str().split(" -> ").next().unwrap_or_default(),
            _ => name.as_str(),
        };
        Ok(Self {
            name: name.to_string(),
            kind,
            size: Some(size),
            modified: Some(modified),
        })
    }

    /// Try to parse a "LIST" output command line in DOS format.
    ///
    /// ```text
    /// {DATE} {TIME} {<DIR> | SIZE} {FILENAME}
    /// 10-19-20  03:19PM <DIR> pub
    /// 04-08-14  03:09PM 403   readme.txt
    /// ```
    pub fn from_dos_line(line: &str) -> Result<Self, ParseError> {
        let metadata = DOS_LS_RE.captures(line).ok_or(ParseError::SyntaxError)?;
        trace!("Parsed DOS line {}", line);
        let (Some(datetime), Some(name)) = (metadata.get(1), metadata.get(4)) else {
            return Err(ParseError::SyntaxError);
        };
        let modified = parse_dostime(datetime.as_str())?;
        if metadata.get(2).is_some() {
            return Ok(Self {
                name: name.as_str().to_string(),
                kind: ItemKind::Directory,
                size: None,
                modified: Some(modified),
            });
        }
        let size = match metadata.get(3).map(|m| m.as_str().replace(',', "")) {
            Some(digits) if !digits.is_empty() => {
                Some(digits.parse::<u64>().map_err(|_| ParseError::BadSize)?)
            }
            _ => None,
        };
        Ok(Self {
            name: name.as_str().to_string(),
            kind: ItemKind::File,
            size,
            modified: Some(modified),
        })
    }

    /// Last resort for unknown formats: a leading `d` marks a directory and the last token is the name
    pub fn from_loose_line(line: &str) -> Result<Self, ParseError> {
        let name = line
            .split_whitespace()
            .last()
            .ok_or(ParseError::SyntaxError)?;
        let kind = match line.trim_start().starts_with('d') && line.split_whitespace().count() > 1 {
            true => ItemKind::Directory,
            false => ItemKind::File,
        };
        Ok(Self {
            name: name.to_string(),
            kind,
            size: None,
            modified: None,
        })
    }
}

impl FromStr for ListingItem {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl TryFrom<&str> for ListingItem {
    type Error = ParseError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        Self::from_posix_line(line)
            .or_else(|_| Self::from_dos_line(line))
            .or_else(|_| Self::from_loose_line(line))
    }
}

/// Convert ls syntax time to System Time
/// ls time has two possible syntax:
/// 1. if year is current: %b %d %H:%M (e.g. Nov 5 13:46)
/// 2. else: %b %d %Y (e.g. Nov 5 2019)
fn parse_lstime(tm: &str, fmt_year: &str, fmt_hours: &str) -> Result<SystemTime, ParseError> {
    let datetime = match NaiveDate::parse_from_str(tm, fmt_year) {
        Ok(date) => date.and_hms_opt(0, 0, 0).ok_or(ParseError::InvalidDate)?,
        Err(_) => {
            // Might be case 1: the current year is implied
            let this_year = Utc::now().year();
            NaiveDateTime::parse_from_str(&format!("{tm} {this_year}"), &format!("{fmt_hours} %Y"))
                .map_err(|_| ParseError::InvalidDate)?
        }
    };
    Ok(to_system_time(datetime))
}

/// Parse date time string in DOS representation ("%m-%d-%y %I:%M%p")
fn parse_dostime(tm: &str) -> Result<SystemTime, ParseError> {
    NaiveDateTime::parse_from_str(tm, "%m-%d-%y %I:%M%p")
        .map(to_system_time)
        .map_err(|_| ParseError::InvalidDate)
}

fn to_system_time(datetime: NaiveDateTime) -> SystemTime {
    u64::try_from(datetime.and_utc().timestamp())
        .ok()
        .and_then(|secs| SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs)))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
