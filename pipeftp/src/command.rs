//! # Command
//!
//! The commands the engine puts on the control connection

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ftp commands with their arguments
pub enum Command {
    /// Change working directory
    Cwd(String),
    /// List entries at specified path. If path is not provided list entries at current working directory
    List(Option<String>),
    /// Provide login password
    Pass(String),
    /// Passive mode
    Pasv,
    /// Quit
    Quit,
    /// Provide user to login as
    User(String),
    /// Raw command text supplied by the caller
    Custom(String),
}

impl Command {
    /// Build a command from caller supplied text; a trailing terminator is stripped since
    /// the engine always appends its own.
    pub fn raw(text: impl AsRef<str>) -> Self {
        Self::Custom(text.as_ref().trim_end_matches(['\r', '\n']).to_string())
    }

    /// Command line as it may appear in logs. Secrets are masked
    pub fn redacted(&self) -> String {
        match self {
            Self::Pass(_) => "PASS ********".to_string(),
            Self::Custom(c) if c.to_ascii_uppercase().starts_with("PASS ") => {
                "PASS ********".to_string()
            }
            other => other.line(),
        }
    }

    /// Command line without terminator
    fn line(&self) -> String {
        match self {
            Self::Cwd(d) => format!("CWD {d}"),
            Self::List(p) => p
                .as_deref()
                .map(|x| format!("LIST {x}"))
                .unwrap_or_else(|| "LIST".to_string()),
            Self::Pass(p) => format!("PASS {p}"),
            Self::Pasv => "PASV".to_string(),
            Self::Quit => "QUIT".to_string(),
            Self::User(u) => format!("USER {u}"),
            Self::Custom(c) => c.clone(),
        }
    }
}

/// Wire form: the command line terminated by CRLF
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.line())
    }
}
