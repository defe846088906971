//! peer-session - Main entry point
//!
//! Negotiates one data channel through copy-and-paste signaling, then turns
//! stdin/stdout into a line-based chat over it.

mod args;

use args::{Args, Mode};
use clap::Parser;
use log::{error, info, warn};
use peer_session::config::{Config, PeerConfig};
use peer_session::peer::{PeerCallbacks, Payload, SessionHandle};
use peer_session::rtc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::signal;
use tokio::sync::mpsc;

/// Channel activity reported by the session callbacks
enum Incoming {
    Opened,
    Message(Payload),
    Error(String),
    Closed,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();
    let loaded = args.load_config();

    // Initialize logging with noise filtering for third-party WebRTC crates.
    // Logs go to stderr so stdout only carries descriptions and chat.
    let log_level = match (&loaded, args.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(cfg), false) => cfg.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("PEER_SESSION_LOG").unwrap_or(log_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .filter_module("webrtc_sctp", log::LevelFilter::Warn)
        .init();

    info!("peer-session v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };

    let settings = config.peer_settings().with_overrides(args.overrides());
    if let Err(e) = settings.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let (incoming_tx, mut incoming) = mpsc::unbounded_channel();
    let callbacks = {
        let (open_tx, close_tx, error_tx) = (incoming_tx.clone(), incoming_tx.clone(), incoming_tx.clone());
        PeerCallbacks::default()
            .on_open(move || {
                let _ = open_tx.send(Incoming::Opened);
            })
            .on_close(move || {
                let _ = close_tx.send(Incoming::Closed);
            })
            .on_error(move |err| {
                let _ = error_tx.send(Incoming::Error(err.to_string()));
            })
            .on_message(move |payload| {
                let _ = incoming_tx.send(Incoming::Message(payload));
            })
    };

    let session = rtc::spawn_session(PeerConfig::from_settings(settings).with_callbacks(callbacks)).await;
    info!("Session {} ready ({:?})", session.id(), args.mode);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    match args.mode {
        Mode::Offer => {
            let offer = session.offer().await?;
            print_line(&mut stdout, &offer).await?;
            info!("Waiting for the remote answer on stdin");
            let Some(answer) = stdin.next_line().await? else {
                return Err("stdin closed before the answer arrived".into());
            };
            session.accept(&answer).await?;
        }
        Mode::Answer => {
            info!("Waiting for the remote offer on stdin");
            let Some(offer) = stdin.next_line().await? else {
                return Err("stdin closed before the offer arrived".into());
            };
            let answer = session.answer(&offer).await?;
            print_line(&mut stdout, &answer).await?;
        }
    }

    let mut health = tokio::time::interval(Duration::from_millis(500));
    let mut connected = false;

    loop {
        tokio::select! {
            line = stdin.next_line(), if connected => match line? {
                Some(line) => {
                    if let Err(e) = session.send(line).await {
                        warn!("Send failed: {}", e);
                    }
                }
                None => {
                    info!("stdin closed");
                    break;
                }
            },
            event = incoming.recv() => match event {
                Some(Incoming::Opened) => {
                    info!("Connected, type a line to send it");
                    connected = true;
                }
                Some(Incoming::Message(Payload::Text(text))) => print_line(&mut stdout, &text).await?,
                Some(Incoming::Message(Payload::Binary(data))) => {
                    print_line(&mut stdout, &format!("<{} bytes>", data.len())).await?
                }
                Some(Incoming::Error(e)) => warn!("Channel error: {}", e),
                Some(Incoming::Closed) | None => {
                    info!("Channel closed by remote peer");
                    return Ok(());
                }
            },
            _ = health.tick() => {
                if let Err(e) = check_session(&session).await {
                    error!("Session failed: {}", e);
                    return Err(e.into());
                }
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.close().await?;
    Ok(())
}

/// Surface a failure the session recorded asynchronously
async fn check_session(session: &SessionHandle) -> Result<(), peer_session::PeerError> {
    let state = session.state().await?;
    if state == peer_session::SessionState::Failed {
        return Err(session
            .last_error()
            .await?
            .unwrap_or(peer_session::PeerError::SessionEnded));
    }
    Ok(())
}

async fn print_line(stdout: &mut Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
