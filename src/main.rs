use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lms::config::{DEFAULT_CONFIG_FILE, LmsConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "lms")]
#[command(version, about = "Multi-tenant learning management backend")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, listen on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create or upgrade the database schema and exit
    Migrate {
        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create the first admin account of an empty installation
    Bootstrap {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long, default_value = "Administrator")]
        name: String,

        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default lms.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&cli.config, command.clone());
    }

    let mut config = LmsConfig::resolve(&cli.config)?;
    let _guard = lms::telemetry::init(&config.log, cli.verbose)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Serve { port, db_path, dev } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(path) = db_path {
                config.database.path = path;
            }
            if dev {
                config.server.cors_permissive = true;
                config.server.host = "0.0.0.0".to_string();
            }
            cmd::cmd_serve(config).await?;
        }
        Commands::Migrate { db_path } => {
            if let Some(path) = db_path {
                config.database.path = path;
            }
            cmd::cmd_migrate(&config)?;
        }
        Commands::Bootstrap {
            email,
            password,
            name,
            db_path,
        } => {
            if let Some(path) = db_path {
                config.database.path = path;
            }
            cmd::cmd_bootstrap(&config, &email, &name, &password)?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
