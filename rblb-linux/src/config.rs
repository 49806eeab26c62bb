//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Daemon configuration. File: ~/.config/rblb/config.toml or /etc/rblb/config.toml.
/// Env overrides: RBLB_SERIAL_PORT, RBLB_BAUD_RATE, RBLB_UID.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Serial device the bus transceiver is attached to (default /dev/ttyUSB0).
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    /// Line rate (default 1 MBaud).
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Own uid. 0 (the default) runs as host; anything else runs as a passive node monitor.
    #[serde(default)]
    pub uid: u64,
    /// Seconds between discovery rounds; 0 disables them (default 10).
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    /// Framing parameters shared with the nodes.
    #[serde(default)]
    pub bus: rblb_core::Config,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    1_000_000
}
fn default_discovery_interval_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            uid: 0,
            discovery_interval_secs: default_discovery_interval_secs(),
            bus: rblb_core::Config::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("RBLB_SERIAL_PORT") {
        c.serial_port = s;
    }
    if let Ok(s) = std::env::var("RBLB_BAUD_RATE") {
        if let Ok(b) = s.parse::<u32>() {
            c.baud_rate = b;
        }
    }
    if let Ok(s) = std::env::var("RBLB_UID") {
        if let Some(uid) = parse_uid(&s) {
            c.uid = uid;
        }
    }
    c
}

/// Decimal or 0x-prefixed hex.
fn parse_uid(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rblb/config.toml"));
    }
    out.push(PathBuf::from("/etc/rblb/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| toml::from_str::<Config>(&s)) {
                Ok(Ok(c)) => return Some(c),
                Ok(Err(e)) => warn!(path = %p.display(), error = %e, "ignoring invalid config file"),
                Err(e) => warn!(path = %p.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    None
}
