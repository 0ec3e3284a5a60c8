//! CLI interface for voice-roleplay

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::roles::{RoleDirectory, StaticRoles};

#[derive(Parser)]
#[command(name = "voice-roleplay")]
#[command(about = "Real-time voice roleplay server: streaming ASR, LLM and TTS over one WebSocket", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML config file (default: ./voice-roleplay.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the voice dialog server (the default)
    Serve {
        /// Listener port override
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List the built-in roleplay roles
    Roles,
    /// Print the effective configuration (secrets redacted)
    Config,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            crate::server::start(config).await
        }
        Commands::Roles => {
            let roles = StaticRoles::builtin().list().await?;
            for role in roles {
                println!("{:>3}  {}", role.id, role.name);
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_display_toml());
            Ok(())
        }
    }
}
