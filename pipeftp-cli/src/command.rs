use std::str::FromStr;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Connect(String, bool),
    Cwd(String),
    Help,
    List,
    Login(String),
    Quote(String),
    Quit,
    State,
}

impl FromStr for Command {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split string by space
        let mut args = s.split_ascii_whitespace();
        // Match args
        match args.next() {
            Some(cmd) => match cmd.to_ascii_uppercase().as_str() {
                "CONNECT" => match args.next() {
                    Some(addr) => Ok(Self::Connect(addr.to_string(), false)),
                    None => Err("Missing `addr` field"),
                },
                "CONNECT+S" => match args.next() {
                    Some(addr) => Ok(Self::Connect(addr.to_string(), true)),
                    None => Err("Missing `addr` field"),
                },
                "CWD" => match args.next() {
                    Some(p) => Ok(Self::Cwd(p.to_string())),
                    None => Err("Missing `dir` field"),
                },
                "HELP" => Ok(Self::Help),
                "LIST" => Ok(Self::List),
                "LOGIN" => match args.next() {
                    Some(user) => Ok(Self::Login(user.to_string())),
                    None => Err("Missing `user` field"),
                },
                "QUOTE" => match args.collect::<Vec<&str>>().join(" ") {
                    s if s.is_empty() => Err("Missing `command` field"),
                    s => Ok(Self::Quote(s)),
                },
                "QUIT" => Ok(Self::Quit),
                "STATE" => Ok(Self::State),
                _ => Err("Unknown command"),
            },
            None => Err("Unknown command"),
        }
    }
}
