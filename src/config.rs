//! Command-line configuration, in the style of the teacher's `app/args.rs`:
//! a single `clap::Parser` struct that's turned into runtime config at startup.
use clap::Parser;
use std::path::PathBuf;

/// Top-level CLI configuration for a PeerSync node.
#[derive(Parser, Debug, Clone)]
#[command(name = "peersync", about = "Embedded peer-to-peer database sync engine")]
pub struct Config {
    /// TCP port for the HTTP/sync listener.
    #[arg(long, default_value_t = 59840)]
    pub port: u16,

    /// Interface address to bind to ("0.0.0.0" for all interfaces).
    #[arg(long, default_value = "0.0.0.0")]
    pub interface: String,

    /// Application-chosen discovery domain. Must be <= 63 bytes and must not
    /// contain '.', ',' or '\\'.
    #[arg(long, default_value = "default")]
    pub peer_group_id: String,

    /// Discovery providers to enable (e.g. "dnssd", "ble"). Empty means all registered.
    #[arg(long)]
    pub providers: Vec<String>,

    /// Parent directory under which named databases are opened.
    #[arg(long, default_value = "./data")]
    pub database_dir: PathBuf,

    /// Allow `PUT /{db}` to create new databases.
    #[arg(long, default_value_t = true)]
    pub allow_create_dbs: bool,

    /// Allow `DELETE /{db}` to delete databases.
    #[arg(long, default_value_t = false)]
    pub allow_delete_dbs: bool,

    /// Heartbeat (PING) interval in seconds for WebSocket connections.
    #[arg(long, default_value_t = 300)]
    pub heartbeat_secs: u64,

    /// Display name advertised by discovery providers, if publishing is enabled.
    #[arg(long)]
    pub display_name: Option<String>,
}

impl Config {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.peer_group_id.is_empty() || self.peer_group_id.len() > 63 {
            return Err(crate::error::Error::invalid_parameter(
                "peer_group_id must be 1..=63 bytes",
            ));
        }
        if self.peer_group_id.contains(['.', ',', '\\']) {
            return Err(crate::error::Error::invalid_parameter(
                "peer_group_id must not contain '.', ',' or '\\\\'",
            ));
        }
        Ok(())
    }
}
