// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - operator CLI for the conversation engine.
//!
//! Prepares the database, inspects the ledger and sessions, sends paced
//! messages, and opens provider media by hand.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::ParleyConfig;
use parley_core::{MediaCategory, ParleyError};

/// Parley - operator CLI for the conversation engine.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and apply pending migrations.
    Migrate,
    /// Send one text message through the paced egress queue.
    Send {
        /// Recipient phone number.
        to: String,
        text: String,
    },
    /// Decrypt a downloaded media blob.
    Decrypt {
        /// The encrypted file (`.enc`).
        input: PathBuf,
        /// Base64 media key from the webhook payload.
        #[arg(long)]
        key: String,
        /// Container the media arrived in.
        #[arg(long, value_parser = parse_category, default_value = "document")]
        category: MediaCategory,
        /// Declared mimetype, if known.
        #[arg(long)]
        mimetype: Option<String>,
        /// Where to write the plaintext. Defaults next to the input.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Inspect the ingestion ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerCommands,
    },
    /// Inspect conversation sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsCommands,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Print the inbound messages a webhook payload file normalizes to.
    Normalize { input: PathBuf },
}

#[derive(Subcommand, Debug)]
enum LedgerCommands {
    /// Events whose last turn rolled back.
    Failed {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SessionsCommands {
    /// Sessions currently open.
    Open {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration with credentials masked.
    Show,
}

fn parse_category(raw: &str) -> Result<MediaCategory, String> {
    raw.to_ascii_lowercase()
        .parse::<MediaCategory>()
        .map_err(|_| format!("unknown media category {raw:?} (image, video, audio, document)"))
}

fn load_config(path: Option<&PathBuf>) -> ParleyConfig {
    let loaded = match path {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn run(cli: Cli, config: &ParleyConfig) -> Result<String, ParleyError> {
    match cli.command {
        Commands::Migrate => commands::migrate(config).await,
        Commands::Send { to, text } => commands::send(config, &to, &text).await,
        Commands::Decrypt {
            input,
            key,
            category,
            mimetype,
            output,
        } => {
            commands::decrypt(&commands::DecryptArgs {
                input,
                media_key: key,
                category,
                mimetype,
                output,
            })
            .await
        }
        Commands::Ledger {
            action: LedgerCommands::Failed { limit, json },
        } => commands::ledger_failed(config, limit, json).await,
        Commands::Sessions {
            action: SessionsCommands::Open { json },
        } => commands::sessions_open(config, json).await,
        Commands::Config {
            action: ConfigCommands::Show,
        } => commands::config_show(config),
        Commands::Normalize { input } => commands::normalize(config, &input).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());
    init_tracing(&config.service.log_level);

    match run(cli, &config).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("parley: {e} [{}]", e.kind());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn nested_subcommands_parse() {
        let cli = Cli::try_parse_from(["parley", "ledger", "failed", "--limit", "5", "--json"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ledger {
                action: LedgerCommands::Failed { limit: 5, json: true }
            }
        ));

        let cli = Cli::try_parse_from([
            "parley",
            "--config",
            "/tmp/p.toml",
            "decrypt",
            "x.enc",
            "--key",
            "AAAA",
            "--category",
            "Image",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
        assert!(matches!(
            cli.command,
            Commands::Decrypt {
                category: MediaCategory::Image,
                ..
            }
        ));
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!(parse_category("sticker").is_err());
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = parley_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.service.log_level, "info");
    }
}
