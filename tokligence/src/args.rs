use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Tokligence Gateway: an LLM request gateway with a content firewall.
#[derive(Debug, Parser)]
#[command(name = "tokligence", version)]
pub(crate) struct Args {
    /// Path to the gateway TOML configuration file.
    #[arg(short, long, default_value = "tokligence.toml")]
    pub config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. `info` or `server=debug,llm=debug`.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}
