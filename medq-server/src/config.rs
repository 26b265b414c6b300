use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("static default address")
}

fn default_event_capacity() -> usize {
    256
}

/// Server configuration: TOML file, overridden by environment, overridden by
/// CLI flags (merged in `main`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Postgres connection string. Absent means demo mode (in-memory store).
    #[serde(default)]
    pub database_url: Option<String>,

    /// Capacity of the clinic-changed broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL")
            && !url.is_empty()
        {
            config.database_url = Some(url);
        }
        if let Ok(addr) = std::env::var("MEDQ_BIND_ADDR")
            && !addr.is_empty()
        {
            config.bind_addr = addr
                .parse()
                .context("parsing MEDQ_BIND_ADDR as a socket address")?;
        }

        Ok(config)
    }
}
