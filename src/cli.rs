use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "streamgate",
    version,
    about = "Access control and network defense toolkit for streaming panels"
)]
pub struct Cli {
    /// Path to configuration file (also settable via STREAMGATE_CONFIG env var)
    #[arg(short, long, default_value = "config.toml", env = "STREAMGATE_CONFIG")]
    pub config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hash a password using Argon2id for use in the user database
    HashPassword {
        /// Password to hash (if not provided, reads from stdin)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Generate a random password and its Argon2id hash
    GeneratePassword {
        /// Password length
        #[arg(long, default_value = "20")]
        length: usize,
    },
    /// Validate configuration file
    CheckConfig,
    /// Probe and allocate web, stream, and RTMP ports
    AllocatePorts {
        /// Write the assignment to the configured state file
        #[arg(long)]
        save: bool,
    },
    /// Show firewall and ban status
    Status,
}
