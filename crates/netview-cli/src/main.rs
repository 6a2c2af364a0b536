//! NetView CLI — host or join a session of networked objects.
//!
//! `serve` runs the authoritative server, `join` connects a client, and both
//! register the same demo lamp so calls and authority requests can be tried
//! from the terminal.

mod cli;
mod cmd;
mod demo;
mod ui;

use crate::cli::*;
use clap::Parser;
use cmd::session::{JoinOverrides, ServeOverrides};
use netview_kernel::config::load_config;

/// Trace to stderr, honoring `RUST_LOG` over the configured level.
fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            max_connections,
            offline,
            secret,
        } => {
            let config = load_config(cli.config.as_deref());
            init_tracing_stderr(&config.log_level);
            let config = cmd::session::apply_serve(
                config,
                ServeOverrides {
                    listen,
                    max_connections,
                    offline,
                    secret,
                },
            );
            cmd::session::cmd_serve(config);
        }
        Commands::Join {
            server,
            nickname,
            secret,
            toggle,
            claim,
        } => {
            let config = load_config(cli.config.as_deref());
            init_tracing_stderr(&config.log_level);
            let config = cmd::session::apply_join(
                config,
                JoinOverrides {
                    server,
                    nickname,
                    secret,
                },
            );
            cmd::session::cmd_join(config, toggle, claim);
        }
        Commands::Config(sub) => {
            init_tracing_stderr("warn");
            match sub {
                ConfigCommands::Show => cmd::config::cmd_config_show(cli.config),
                ConfigCommands::Path => cmd::config::cmd_config_path(cli.config),
                ConfigCommands::Init { force } => {
                    cmd::config::cmd_config_init(cli.config, force)
                }
            }
        }
    }
}
