use clap::Parser;
use collaboration::{SyncConfig, SyncProtocol, Version};
use std::time::Duration;

/// Process configuration. Every flag falls back to an environment variable or a default.
#[derive(Debug, Clone, Parser)]
#[command(name = "collab-server")]
#[command(about = "Real-time collaborative document server")]
#[command(version)]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "COLLAB_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for both HTTP and WebSocket traffic
    #[arg(short, long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// Version the document starts at
    #[arg(long, default_value_t = 0)]
    pub initial_version: Version,

    /// Ingestion protocol (steps or document)
    #[arg(long, default_value_t = SyncProtocol::Steps)]
    pub protocol: SyncProtocol,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            protocol: self.protocol,
            initial_version: self.initial_version,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            ..SyncConfig::default()
        }
    }
}
