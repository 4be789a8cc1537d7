use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::prelude::*;

use companion_session::config::{FileConfig, default_config_path, load_config};
use companion_session::{
    CompanionContext, Endpoint, MessageId, Sender, SessionConfig, SessionController, SessionError,
    SessionSnapshot, WsConnector, spawn_session,
};

#[derive(Parser)]
#[command(name = "companion-chat")]
#[command(about = "Talk to an AI companion session from the terminal")]
struct Cli {
    /// Companion session id to open
    #[arg(short, long)]
    session: String,

    /// Name to show for the companion until it reveals one
    #[arg(long, default_value = "Companion")]
    companion_name: String,

    /// Your name, sent with every message
    #[arg(short, long, default_value = "")]
    user_name: String,

    /// Config file (defaults to <config_dir>/companion/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Prints transcript changes as they arrive, streaming tokens inline.
#[derive(Default)]
struct Printer {
    /// Text already written for AI messages that are still open
    printed: HashMap<MessageId, String>,
    finished_up_to: Option<MessageId>,
    connected: bool,
    companion: String,
}

impl Printer {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        let mut out = std::io::stdout().lock();

        if snapshot.display.connected != self.connected {
            self.connected = snapshot.display.connected;
            let status = if self.connected {
                "connected"
            } else if snapshot.stream_stalled {
                "disconnected mid-reply"
            } else {
                "disconnected"
            };
            let _ = writeln!(out, "[{}]", status);
        }

        if !snapshot.display.companion_display_name.is_empty()
            && snapshot.display.companion_display_name != self.companion
        {
            if !self.companion.is_empty() {
                let _ = writeln!(
                    out,
                    "[your companion is now called {}]",
                    snapshot.display.companion_display_name
                );
            }
            self.companion = snapshot.display.companion_display_name.clone();
        }

        for message in &snapshot.messages {
            if self.finished_up_to.is_some_and(|done| message.id() <= done) {
                continue;
            }
            if message.sender() == Sender::User {
                if !message.is_streaming() {
                    self.finished_up_to = Some(message.id());
                }
                continue;
            }

            let printed = self.printed.entry(message.id()).or_default();
            if printed.is_empty() {
                let _ = write!(out, "{}: ", self.companion);
            }
            match message.text().strip_prefix(printed.as_str()) {
                Some(rest) => {
                    let _ = write!(out, "{}", rest);
                }
                None => {
                    let _ = write!(out, "\r\n{}: {}", self.companion, message.text());
                }
            }
            *printed = message.text().to_string();

            if message.is_streaming() {
                break;
            }
            match message.intent() {
                Some(intent) if message.is_stalled() => {
                    let _ = writeln!(out, "  ({}, stalled)", intent);
                }
                Some(intent) => {
                    let _ = writeln!(out, "  ({})", intent);
                }
                None if message.is_stalled() => {
                    let _ = writeln!(out, "  (stalled)");
                }
                None => {
                    let _ = writeln!(out);
                }
            }
            self.printed.remove(&message.id());
            self.finished_up_to = Some(message.id());
        }
        let _ = out.flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let default_directive = if args.debug {
        "companion_session=debug"
    } else {
        "companion_session=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = args.config.clone().or_else(default_config_path);
    let file_config: FileConfig = load_config(config_path.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    let session_config = SessionConfig::from_file(&file_config.session);
    let endpoint = Endpoint::from_file(&file_config.server);
    info!(endpoint = %endpoint.for_session(&args.session), "Starting companion chat");

    let context = CompanionContext::new(args.session.clone())
        .with_companion_name(args.companion_name.clone())
        .with_user_name(args.user_name.clone());
    let controller = SessionController::new(context, session_config.clone());
    let connector = WsConnector::new(endpoint, session_config.event_buffer);
    let (handle, task) = spawn_session(controller, connector);

    let mut updates = handle.subscribe();
    let mut printer = Printer::default();
    printer.render(&handle.snapshot());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/reconnect" => handle.reconnect().await?,
                    _ => match handle.submit(line).await {
                        Ok(_) => {}
                        Err(SessionError::Rejected(reason)) => eprintln!("[not sent: {}]", reason),
                        Err(err) => return Err(err.into()),
                    },
                }
            }

            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                printer.render(&snapshot);
            }
        }
    }

    // The actor may already be gone if it ended on its own
    let _ = handle.end().await;
    let _ = task.await;
    eprintln!("[session ended]");
    Ok(())
}
