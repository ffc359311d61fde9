//! CLI entry point for captivate-chat

mod commands;

use anyhow::{bail, Context, Result};
use captivate_chat_client::{Conversation, Delivery, EndpointMode, MessageOrigin, Session, StartMode};
use captivate_chat_core::config::{ClientConfig, Config, ConfigLoader};
use captivate_chat_core::logging::{init_logging, WorkerGuard};
use captivate_chat_core::utils::mask_secret;
use clap::{Parser, Subcommand};
use commands::{parse_line, ChatCommand, HELP};
use console::style;
use dialoguer::{Confirm, Input, Select};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "captivate-chat")]
#[command(about = "Talk to the Captivate chat service from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// API key (overrides the configured one)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Endpoint mode: prod or dev
    #[arg(long, global = true)]
    mode: Option<EndpointMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize captivate-chat configuration
    Onboard,
    /// Show status information
    Status,
    /// Start or resume a conversation interactively
    Chat {
        /// User id sent with a new conversation
        #[arg(short, long)]
        user_id: Option<String>,
        /// Resume an existing conversation instead of creating one
        #[arg(long)]
        conversation: Option<String>,
        /// Who speaks first in a new conversation
        #[arg(long, default_value = "bot-first")]
        start: StartMode,
    },
    /// Print a conversation transcript
    Transcript {
        /// Conversation id
        conversation_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = &cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    match cli.command {
        Commands::Onboard => {
            run_onboard(&config_loader)?;
        }
        Commands::Status => {
            let (config, _log_guard) = load_config(&config_loader, cli.api_key, cli.mode)?;
            info!("Showing status");
            run_status(&config_loader, &config);
        }
        Commands::Chat {
            user_id,
            conversation,
            start,
        } => {
            let (config, _log_guard) = load_config(&config_loader, cli.api_key, cli.mode)?;
            info!("Starting chat");
            run_chat(&config.client, user_id, conversation, start).await?;
        }
        Commands::Transcript { conversation_id } => {
            let (config, _log_guard) = load_config(&config_loader, cli.api_key, cli.mode)?;
            info!("Fetching transcript for {}", conversation_id);
            run_transcript(&config.client, &conversation_id).await?;
        }
    }

    Ok(())
}

/// Load configuration, apply command-line overrides and start logging
fn load_config(
    loader: &ConfigLoader,
    api_key: Option<String>,
    mode: Option<EndpointMode>,
) -> Result<(Config, WorkerGuard)> {
    let mut config = loader.load()?;
    if let Some(api_key) = api_key {
        config.client.api_key = api_key;
    }
    if let Some(mode) = mode {
        config.client.mode = mode;
    }

    config.logging.dir = resolve_log_dir(loader.config_dir(), &config.logging.dir)
        .to_string_lossy()
        .into_owned();
    let guard = init_logging(&config.logging);
    Ok((config, guard))
}

/// Relative log directories live under the config directory
fn resolve_log_dir(config_dir: &Path, dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        path
    } else {
        config_dir.join(path)
    }
}

/// Run the onboard wizard
fn run_onboard(loader: &ConfigLoader) -> Result<()> {
    println!("{}", style("Welcome to Captivate Chat!").bold().cyan());
    println!("Let's set up your configuration.\n");

    let config_path = loader.config_path();
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt("Configuration already exists. Overwrite?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let api_key: String = Input::new()
        .with_prompt("Enter your Captivate API key")
        .interact_text()?;

    let modes = [EndpointMode::Production, EndpointMode::Development];
    let mode_idx = Select::new()
        .with_prompt("Select the endpoint")
        .items(&modes)
        .default(0)
        .interact()?;

    let mut config = Config::default();
    config.client.api_key = api_key.trim().to_string();
    config.client.mode = modes[mode_idx];
    loader.save(&config)?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Start chatting", style("captivate-chat chat").cyan());
    println!(
        "  {} - Print a transcript",
        style("captivate-chat transcript <conversation-id>").cyan()
    );

    Ok(())
}

/// Show configuration status
fn run_status(loader: &ConfigLoader, config: &Config) {
    let client = &config.client;

    println!("{}", style("Captivate Chat Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config file: {}", loader.config_path().display());
    println!("  Log directory: {}", config.logging.dir);
    println!();

    println!("{}", style("Connection:").bold());
    println!("  Mode: {}", client.mode);
    let key_status = if client.api_key.is_empty() {
        style("not configured".to_string()).red()
    } else {
        style(mask_secret(&client.api_key)).green()
    };
    println!("  API key: {}", key_status);
    println!(
        "  Endpoint: {}",
        captivate_chat_core::config::endpoint_url(
            client.mode.base_url(&client.endpoints),
            &mask_secret(&client.api_key)
        )
    );
    println!("  Connect timeout: {}s", client.connect_timeout_secs);
    println!("  Request timeout: {}s", client.request_timeout_secs);
}

async fn connect(client: &ClientConfig) -> Result<Session> {
    if client.api_key.is_empty() {
        bail!("No API key configured. Run `captivate-chat onboard` or pass --api-key");
    }

    let session = Session::from_config(client);
    println!("{}", style(format!("Connecting to {} ...", client.mode)).cyan());
    session
        .connect()
        .await
        .context("Failed to connect to the chat service")?;
    println!("{}", style("Connected.").green());
    Ok(session)
}

/// Interactive chat loop
async fn run_chat(
    client: &ClientConfig,
    user_id: Option<String>,
    conversation_id: Option<String>,
    start: StartMode,
) -> Result<()> {
    let session = connect(client).await?;

    let conversation = match conversation_id {
        Some(id) => session.get_conversation(&id)?,
        None => {
            let user_id = user_id.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
            session
                .create_conversation(&user_id, json!({}), json!({}), start)
                .await
                .context("Failed to create conversation")?
        }
    };
    attach_printers(&conversation);

    println!(
        "Conversation {} ({})",
        style(conversation.conversation_id()).bold(),
        style("type /help for commands").dim()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{} {}", style("✗").red(), e);
                continue;
            }
        };

        let delivery = match command {
            ChatCommand::Empty => continue,
            ChatCommand::Quit => break,
            ChatCommand::Help => {
                println!("{}", HELP);
                continue;
            }
            ChatCommand::ShowId => {
                println!("{}", conversation.conversation_id());
                continue;
            }
            ChatCommand::Transcript => {
                match conversation.get_transcript().await {
                    Ok(records) => print_transcript(&records)?,
                    Err(e) => println!("{} {}", style("✗").red(), e),
                }
                continue;
            }
            ChatCommand::Message(text) => conversation.send_message(&text).await,
            ChatCommand::Metadata(metadata) => conversation.set_metadata(metadata).await,
            ChatCommand::Action { action_id, data } => {
                conversation.send_action(&action_id, data).await
            }
        };

        if delivery == Delivery::Dropped {
            warn!("Message dropped; connection is closed");
            println!("{}", style("Connection closed. Exiting.").yellow());
            break;
        }
    }

    session.close().await;
    println!("{}", style("Bye.").green());
    Ok(())
}

fn attach_printers(conversation: &Conversation) {
    conversation.on_message(|content, origin| {
        let who = match origin {
            MessageOrigin::Bot => style("bot").cyan().bold(),
            MessageOrigin::LiveAgent => style("agent").magenta().bold(),
        };
        println!("{}: {}", who, content);
    });
    conversation.on_action_received(|action_id, data| {
        println!("{} {} {}", style("action").yellow(), action_id, data);
    });
    conversation.on_conversation_update(|payload| {
        println!("{} {}", style("update").dim(), payload);
    });
    conversation.on_error(|payload| {
        println!("{} {}", style("error").red().bold(), payload);
    });
}

/// Print a transcript and exit
async fn run_transcript(client: &ClientConfig, conversation_id: &str) -> Result<()> {
    let session = connect(client).await?;
    let conversation = session.get_conversation(conversation_id)?;
    let records = conversation
        .get_transcript()
        .await
        .context("Failed to fetch transcript")?;
    print_transcript(&records)?;
    session.close().await;
    Ok(())
}

fn print_transcript(records: &[Value]) -> Result<()> {
    if records.is_empty() {
        println!("{}", style("Transcript is empty.").dim());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(records)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_chat_options() {
        let cli = Cli::try_parse_from([
            "captivate-chat",
            "--mode",
            "dev",
            "chat",
            "--conversation",
            "conv-9",
            "--start",
            "user-first",
        ])
        .unwrap();

        assert_eq!(cli.mode, Some(EndpointMode::Development));
        match cli.command {
            Commands::Chat {
                conversation,
                start,
                user_id,
            } => {
                assert_eq!(conversation.as_deref(), Some("conv-9"));
                assert_eq!(start, StartMode::UserFirst);
                assert!(user_id.is_none());
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_start_mode() {
        assert!(Cli::try_parse_from(["captivate-chat", "chat", "--start", "agent-first"]).is_err());
    }

    #[test]
    fn test_relative_log_dir_is_under_config_dir() {
        let config_dir = Path::new("/tmp/captivate");
        assert_eq!(
            resolve_log_dir(config_dir, "logs"),
            PathBuf::from("/tmp/captivate/logs")
        );
        assert_eq!(
            resolve_log_dir(config_dir, "/var/log/captivate"),
            PathBuf::from("/var/log/captivate")
        );
    }
}
