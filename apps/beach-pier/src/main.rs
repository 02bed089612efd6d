use std::path::PathBuf;

use anyhow::Context;
use beach_pier::config::Config;
use beach_pier::session::{SessionChange, SessionError, SessionHandle};
use beach_pier::telemetry::logging::{self, LogConfig, LogLevel};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "beach-pier", about = "Peer-to-peer chat over a websocket rendezvous relay")]
struct Cli {
    /// Relay websocket endpoint
    #[arg(long, env = "PIER_RELAY_URL")]
    relay_url: Option<String>,

    /// Log in with this name right after connecting
    #[arg(long, short = 'n')]
    name: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Login(String),
    Peer(String),
    Who,
    Log,
    Quit,
    Chat(String),
    Empty,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Chat(line.to_string());
        };
        let (verb, rest) = command
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((command, ""));
        match (verb, rest) {
            ("login", name) if !name.is_empty() => Input::Login(name.to_string()),
            ("peer", name) if !name.is_empty() => Input::Peer(name.to_string()),
            ("who", _) => Input::Who,
            ("log", _) => Input::Log,
            ("quit", _) | ("exit", _) => Input::Quit,
            _ => Input::Unknown(line.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let mut config = Config::from_env()?;
    if let Some(url) = cli.relay_url.as_deref() {
        config = config.with_relay_url(url)?;
    }

    let client = beach_pier::connect(&config)
        .await
        .with_context(|| format!("connecting to relay {}", config.relay_url))?;
    let session = client.session();
    session.subscribe(print_change).await?;
    println!("connected to {}", config.relay_url);

    if let Some(name) = cli.name {
        session.login(name).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Quit => break,
            Input::Empty => {}
            Input::Log => {
                for message in client.relay_log() {
                    println!("  {message:?}");
                }
            }
            input => {
                if let Err(err) = dispatch(&session, input).await {
                    if matches!(err, SessionError::Shutdown) {
                        break;
                    }
                    println!("! {err}");
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn dispatch(session: &SessionHandle, input: Input) -> Result<(), SessionError> {
    match input {
        Input::Login(name) => session.login(name).await,
        Input::Peer(name) => session.select_peer(name).await,
        Input::Who => {
            let snapshot = session.snapshot().await?;
            let local = snapshot.state.local_user_name.as_deref().unwrap_or("-");
            let active = snapshot.state.active_peer_name.as_deref().unwrap_or("-");
            println!("you: {local}  peer: {active}  phase: {:?}", snapshot.phase);
            for participant in &snapshot.roster {
                println!("  {}", participant.name());
            }
            Ok(())
        }
        Input::Chat(text) => session.send_message(text).await.map(|_| ()),
        Input::Unknown(line) => {
            println!("unknown command {line:?}; try /login, /peer, /who, /log, /quit");
            Ok(())
        }
        Input::Log | Input::Quit | Input::Empty => Ok(()),
    }
}

fn print_change(change: &SessionChange) {
    match change {
        SessionChange::SocketOpen(open) => println!("* relay {}", if *open { "open" } else { "closed" }),
        SessionChange::LocalUser(Some(name)) => println!("* logging in as {name}"),
        SessionChange::LocalUser(None) => {}
        SessionChange::LoginFailed => println!("* login rejected"),
        SessionChange::Roster(participants) => {
            let names: Vec<_> = participants.iter().map(|p| p.name()).collect();
            println!("* online: {}", names.join(", "));
        }
        SessionChange::ActivePeer(Some(peer)) => println!("* talking to {peer}"),
        SessionChange::ActivePeer(None) => println!("* no active peer"),
        SessionChange::ChannelOpen(true) => println!("* channel open"),
        SessionChange::ChannelOpen(false) => println!("* channel closed"),
        SessionChange::Messages(log) => {
            if let Some(message) = log.values().flatten().max_by_key(|message| message.time) {
                println!("[{}] {}", message.name, message.message);
            }
        }
        SessionChange::Transport(_) => {}
        SessionChange::Diagnostic(detail) => println!("! {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_chat() {
        assert_eq!(Input::parse("/login alice"), Input::Login("alice".into()));
        assert_eq!(Input::parse("  /peer   bob "), Input::Peer("bob".into()));
        assert_eq!(Input::parse("/who"), Input::Who);
        assert_eq!(Input::parse("/log"), Input::Log);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("hello there"), Input::Chat("hello there".into()));
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(Input::parse("/peer"), Input::Unknown("/peer".into()));
    }
}
