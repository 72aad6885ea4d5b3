use std::time::UNIX_EPOCH;

use log::{debug, info};
use pipeftp::{Endpoint, Event, ItemKind, ListingItem, NetworkEngine};
use tokio::sync::mpsc::UnboundedReceiver;

const FTP_PORT: u16 = 21;
const FTPS_PORT: u16 = 990;

/// Parse `host[:port]`
fn endpoint(remote: &str, secure: bool) -> Result<Endpoint, String> {
    let default_port = if secure { FTPS_PORT } else { FTP_PORT };
    let (host, port) = match remote.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|_| format!("Invalid port: {port}"))?,
        ),
        None => (remote, default_port),
    };
    if host.is_empty() {
        return Err(String::from("Missing host"));
    }
    Ok(match secure {
        true => Endpoint::secure(host, port),
        false => Endpoint::new(host, port),
    })
}

pub fn connect(engine: &mut NetworkEngine, remote: &str, secure: bool) {
    match endpoint(remote, secure) {
        Ok(endpoint) => {
            println!("Connecting to {endpoint}...");
            engine.connect(endpoint);
        }
        Err(err) => eprintln!("CONNECT error: {err}"),
    }
}

pub async fn login(engine: &mut NetworkEngine, username: String) {
    let password =
        tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: ")).await;
    match password {
        Ok(Ok(password)) => engine.login(username, password),
        Ok(Err(err)) => eprintln!("Failed to read password: {err}"),
        Err(err) => eprintln!("Failed to read password: {err}"),
    }
}

pub async fn quit(engine: &mut NetworkEngine) {
    engine.disconnect().await;
    println!("OK");
}

pub fn state(engine: &NetworkEngine) {
    println!("{:?}", engine.state());
}

/// Print engine events as they arrive
pub async fn print_events(mut events: UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::ConnectionEstablished => println!("Connected"),
            Event::ConnectionLost => println!("Connection lost"),
            Event::LoggedIn => println!("Logged in"),
            Event::Error(err) => eprintln!("Error: {err}"),
            Event::ResponseReceived(response) => println!("{}", response.raw),
            Event::ContinuationReceived(line) => println!("    {line}"),
            Event::ListingReceived(items) => print_listing(&items),
            Event::RawDataReceived(bytes) => debug!("{} bytes on data connection", bytes.len()),
            Event::DataChannelOpened => debug!("data connection opened"),
            Event::DataChannelClosed => debug!("data connection closed"),
            Event::TransferComplete => debug!("transfer complete"),
            Event::StateChanged(state) => info!("state: {:?}", state),
        }
    }
}

fn print_listing(items: &[ListingItem]) {
    for item in items {
        let kind = match item.kind {
            ItemKind::Directory => 'd',
            ItemKind::File => '-',
        };
        let size = item
            .size
            .map(|size| size.to_string())
            .unwrap_or_default();
        let modified = item
            .modified
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs().to_string())
            .unwrap_or_default();
        println!("{kind} {size:>12} {modified:>12} {}", item.name);
    }
    println!("{} entries", items.len());
}
