//! # pipeftp client
//!
//! An interactive client driving the pipeftp engine. Engine events are printed as they arrive.
//!

// -- mods
mod actions;
mod args;
mod command;

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actions::*;
use args::Args;
use command::Command;
use env_logger::Builder as LogBuilder;
use log::LevelFilter;
use pipeftp::{ChannelObserver, NetworkEngine, Observer};
use tokio::io::{AsyncBufReadExt, BufReader};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn usage() {
    println!("Available commands:");
    println!("CONNECT <addr:port>                 Connect to remote host");
    println!("CONNECT+S <addr:port>               Connect to remote host using implicit FTPS");
    println!("CWD <dir>                           Change working directory");
    println!("HELP                                Print this help");
    println!("LIST                                List files in the current directory");
    println!("LOGIN <user>                        Login to remote; the password is prompted");
    println!("QUOTE <command>                     Send a raw command");
    println!("STATE                               Print connection state");
    println!("QUIT                                Quit pipeftp");
}

fn prompt() {
    print!(">> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() {
    let args: Args = argh::from_env();
    // print version
    if args.version {
        println!("pipeftp {APP_VERSION} - developed by {APP_AUTHORS}");
        return;
    }
    // init logger
    LogBuilder::new()
        .filter_level(if args.debug {
            LevelFilter::Trace
        } else if args.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Off
        })
        .init();

    let (observer, events) = ChannelObserver::new();
    let observer: Arc<dyn Observer> = Arc::new(observer);
    let mut engine =
        NetworkEngine::new(Arc::downgrade(&observer)).with_connect_timeout(CONNECT_TIMEOUT);
    tokio::spawn(print_events(events));

    // connect if host is specified
    if let Some(host) = args.host {
        connect(&mut engine, &host, args.tls);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                eprintln!("Failed to read stdin: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::from_str(&line) {
            Ok(command) => {
                if !perform(&mut engine, command).await {
                    break;
                }
            }
            Err(err) => eprintln!("{err}"),
        }
    }
    quit(&mut engine).await;
}

/// Run `command`. Returns whether the REPL goes on
async fn perform(engine: &mut NetworkEngine, command: Command) -> bool {
    match command {
        Command::Connect(remote, secure) => connect(engine, &remote, secure),
        Command::Cwd(dir) => engine.change_directory(dir),
        Command::Help => usage(),
        Command::List => engine.request_listing(),
        Command::Login(user) => login(engine, user).await,
        Command::Quote(raw) => engine.send_command(raw),
        Command::State => state(engine),
        Command::Quit => return false,
    }
    true
}

#[cfg(test)]
mod test {

    use super::*;

    #[tokio::test]
    async fn should_stop_only_on_quit() {
        let (observer, _events) = ChannelObserver::new();
        let observer: Arc<dyn Observer> = Arc::new(observer);
        let mut engine = NetworkEngine::new(Arc::downgrade(&observer));
        assert!(perform(&mut engine, Command::Help).await);
        assert!(perform(&mut engine, Command::State).await);
        assert!(perform(&mut engine, Command::List).await);
        assert!(!perform(&mut engine, Command::Quit).await);
    }
}
