//! Clap CLI definitions for NetView.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  netview config init               Write a default ~/.netview/config.toml
  netview serve --secret hunter2    Host a session on the configured address
  netview serve --offline           Host without opening a listener
  netview join --toggle 3           Join and flip the demo lamp three times
  netview join --claim              Join and ask for authority over the lamp";

/// NetView: host or join a session of networked objects.
#[derive(Parser, Debug)]
#[command(
    name = "netview",
    version,
    about = "NetView RPC relay and authority arbitration",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Host a session as the authoritative server.
    Serve {
        /// Address to listen on (overrides config).
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Maximum number of clients (overrides config).
        #[arg(long)]
        max_connections: Option<usize>,
        /// Host without a network listener.
        #[arg(long)]
        offline: bool,
        /// Shared secret clients must present (overrides config).
        #[arg(long)]
        secret: Option<String>,
    },
    /// Join a session hosted elsewhere.
    Join {
        /// Server address (overrides config).
        #[arg(long)]
        server: Option<SocketAddr>,
        /// Player name announced to the server (overrides config).
        #[arg(long)]
        nickname: Option<String>,
        /// Shared secret (overrides config).
        #[arg(long)]
        secret: Option<String>,
        /// Toggle the demo lamp this many times after joining.
        #[arg(long, default_value_t = 0)]
        toggle: u32,
        /// Ask for authority over the demo lamp after joining.
        #[arg(long)]
        claim: bool,
    },
    /// Show or create the configuration file [*].
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the config file location.
    Path,
    /// Write a default config file.
    Init {
        /// Replace an existing file (a timestamped backup is kept).
        #[arg(long)]
        force: bool,
    },
}
