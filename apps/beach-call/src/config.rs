use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::Parser;

pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Parser)]
#[command(
    name = "beach-call",
    author,
    version,
    about = "Beach call rendezvous and signaling relay"
)]
pub struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "BEACH_CALL_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Secret used to sign and verify identity tokens (HS256).
    #[arg(long, env = "BEACH_CALL_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: String,

    /// Lifetime of issued identity tokens.
    #[arg(long, env = "BEACH_CALL_TOKEN_TTL_SECS", default_value_t = 3600)]
    pub token_ttl_secs: u64,

    /// Events buffered per connection before further sends are dropped.
    #[arg(long, env = "BEACH_CALL_OUTBOUND_BUFFER", default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    pub outbound_buffer: usize,

    /// Tracing filter directive.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub token_secret: String,
    pub token_ttl: chrono::Duration,
    pub outbound_buffer: usize,
    pub log_filter: String,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.token_secret.trim().is_empty() {
            bail!("token secret must not be empty");
        }
        if cli.token_ttl_secs == 0 {
            bail!("token ttl must be greater than zero");
        }
        if cli.outbound_buffer == 0 {
            bail!("outbound buffer must be greater than zero");
        }
        let token_ttl_secs = i64::try_from(cli.token_ttl_secs)
            .context("token ttl out of range")?;
        Ok(ServerConfig {
            listen_addr,
            token_secret: cli.token_secret,
            token_ttl: chrono::Duration::seconds(token_ttl_secs),
            outbound_buffer: cli.outbound_buffer,
            log_filter: cli.log_filter,
        })
    }
}
