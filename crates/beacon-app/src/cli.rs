//! CLI argument definitions for the Beacon server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Beacon - rule-driven automation for chat events.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Priority: --config flag > BEACON_CONFIG env var > ~/.beacon/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("BEACON_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --port flag > BEACON_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("BEACON_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        config_port
    }

    /// Priority: --data-dir flag > BEACON_DATA_DIR env var > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> String {
        if let Some(ref p) = self.data_dir {
            return p.to_string_lossy().to_string();
        }
        if let Ok(dir) = std::env::var("BEACON_DATA_DIR") {
            return dir;
        }
        config_data_dir.to_string()
    }

    /// Priority: --log-level flag > BEACON_LOG_LEVEL env var > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(level) = std::env::var("BEACON_LOG_LEVEL") {
            return level;
        }
        config_level.to_string()
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".beacon").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_take_priority() {
        let args = CliArgs::parse_from([
            "beacon",
            "--port",
            "9000",
            "--data-dir",
            "/tmp/beacon",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.resolve_port(7820), 9000);
        assert_eq!(args.resolve_data_dir("~/.beacon/data"), "/tmp/beacon");
        assert_eq!(args.resolve_log_level("info"), "debug");
    }

    #[test]
    fn test_explicit_config_path() {
        let args = CliArgs::parse_from(["beacon", "-c", "/etc/beacon.toml"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/beacon.toml"));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/beacon"), PathBuf::from("/var/lib/beacon"));
        assert_eq!(expand_home("relative/dir"), PathBuf::from("relative/dir"));
    }
}
