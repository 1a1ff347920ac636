mod client;
mod config;
mod conversation;
mod events;
mod logging;
mod paths;
mod reconciler;
mod replay;
mod state;
mod status;

use crate::client::{ChatClient, SourceFrame};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::state::View;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "turnsync", version)]
#[command(about = "turnsync — follow agent turns, statuses and multi-agent replies", long_about = None)]
struct Cli {
    /// Config file (defaults to $TURNSYNC_CONFIG, ./turnsync.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the event stream and follow one conversation
    Listen {
        /// Conversation to open
        #[arg(long)]
        conversation: String,

        /// JSON file with the conversation's existing history
        #[arg(long)]
        history: Option<PathBuf>,

        /// Server base URL (overrides config)
        #[arg(long)]
        url: Option<String>,

        /// User id to register as (overrides config)
        #[arg(long)]
        user_id: Option<u64>,

        /// Send this message once connected
        #[arg(long)]
        say: Option<String>,

        /// Agent to address with --say
        #[arg(long)]
        agent: Option<String>,
    },
    /// Replay a recorded JSONL session and print the resulting view
    Replay {
        file: PathBuf,

        /// Conversation the recording belongs to
        #[arg(long, default_value = "replay")]
        conversation: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = Config::load_with_path(cli.config.as_deref())?;

    let log_dir = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: cli.log_level.as_deref().or(config.logging.level.as_deref()),
        directory: config.logging.directory.as_deref(),
        rotation: config.logging.rotation.as_deref(),
        retention_days: config.logging.retention_days,
    });
    if let Some(path) = &config_path {
        info!("Loaded config from {}", path.display());
    }
    if let Some(dir) = &log_dir {
        tracing::debug!("Logging to {}", dir.display());
    }

    match cli.cmd {
        Command::Listen {
            conversation,
            history,
            url,
            user_id,
            say,
            agent,
        } => {
            let mut config = config;
            if let Some(url) = url {
                config.server.url = url;
            }
            if let Some(user_id) = user_id {
                config.session.user_id = user_id;
            }
            config.validate()?;
            let conversation = load_conversation(&conversation, history.as_deref())?;
            listen(&config, conversation, say, agent).await
        }
        Command::Replay { file, conversation } => {
            let outcome =
                replay::replay_file(&file, Conversation::new(&conversation), config.status.hold())
                    .await?;
            for change in &outcome.changes {
                println!(
                    "[+{}ms] {}",
                    change.at_ms,
                    change.status.as_deref().unwrap_or("(idle)")
                );
            }
            println!("{}", serde_json::to_string_pretty(&outcome.view)?);
            Ok(())
        }
    }
}

fn load_conversation(id: &str, history: Option<&Path>) -> Result<Conversation> {
    let Some(path) = history else {
        return Ok(Conversation::new(id));
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading history {}", path.display()))?;
    let mut conversation: Conversation = serde_json::from_str(&content)
        .with_context(|| format!("parsing history {}", path.display()))?;
    if conversation.id != id {
        warn!(
            "History file is for conversation {}, opening it as {}",
            conversation.id, id
        );
        conversation.id = id.to_string();
    }
    Ok(conversation)
}

async fn listen(
    config: &Config,
    conversation: Conversation,
    say: Option<String>,
    agent: Option<String>,
) -> Result<()> {
    let client = ChatClient::new(&config.server.url, config.session.user_id);
    for _ in 0..50 {
        if client.health_check().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !client.health_check().await {
        anyhow::bail!("Server at {} is not reachable", config.server.url);
    }

    client.register_user().await?;
    if let Some(session) = &config.session.widget_session {
        client.register_widget_session(session).await?;
    }

    let conversation_id = conversation.id.clone();
    let (handle, task) = reconciler::spawn(config.status.hold());
    let mut views = handle.subscribe();
    handle.open(conversation)?;
    let mut frames = client.subscribe();
    let mut pending_say = say;
    let mut last_printed = View::default();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(SourceFrame::Event { name, raw }) => handle.inbound(&name, &raw)?,
                Some(SourceFrame::Connected) => {
                    info!("Connected to {}", config.server.url);
                    if let Some(text) = pending_say.take() {
                        handle.user_turn(&text)?;
                        client
                            .send_message(&conversation_id, &text, agent.as_deref())
                            .await?;
                    }
                }
                // The last status stays on screen until the stream comes back.
                Some(SourceFrame::Disconnected(reason)) => warn!("Event stream down: {reason}"),
                None => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_view(&last_printed, &view)?;
                last_printed = view;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing conversation");
                break;
            }
        }
    }

    handle.close()?;
    drop(handle);
    task.await?;
    Ok(())
}

fn print_view(previous: &View, view: &View) -> Result<()> {
    if previous.status != view.status {
        println!("status: {}", view.status.as_deref().unwrap_or("(idle)"));
    }
    // Print the conversation once a turn has settled.
    if previous.streaming && !view.streaming {
        println!("{}", serde_json::to_string_pretty(&view.messages)?);
    }
    Ok(())
}
