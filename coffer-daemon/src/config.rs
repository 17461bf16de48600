//! Daemon configuration, from CLI flags with environment fallbacks.

use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "cofferd", about = "coffer secrets daemon")]
pub struct Config {
    /// Unix socket the daemon listens on.
    #[arg(long, env = "COFFER_SOCKET", default_value = "/run/coffer/cofferd.sock")]
    pub socket_path: PathBuf,

    /// Directory holding the catalogue database and key material.
    #[arg(long, env = "COFFER_DATA_DIR", default_value = "/var/lib/coffer")]
    pub data_dir: PathBuf,

    /// Load test plugins instead of production plugins.
    #[arg(long, env = "COFFER_AUTOTEST")]
    pub autotest_mode: bool,

    /// Maximum number of queued requests before enqueue fails.
    #[arg(long, env = "COFFER_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl Config {
    pub fn catalogue_path(&self) -> PathBuf {
        self.data_dir.join("catalogue.db")
    }

    pub fn plugin_storage_dir(&self) -> PathBuf {
        self.data_dir.join("storage")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = Config::parse_from(["cofferd"]);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(!config.autotest_mode);
        assert!(config.catalogue_path().ends_with("catalogue.db"));
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "cofferd",
            "--socket-path",
            "/tmp/test.sock",
            "--autotest-mode",
            "--queue-capacity",
            "4",
        ]);
        assert!(config.autotest_mode);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/test.sock"));
    }
}
