use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub proxy: ProxyOptions,
}

/// Per-connection proxy options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOptions {
    /// Copy client-to-server traffic without interception.
    pub client_passthrough: bool,
    /// Copy server-to-client traffic without interception.
    pub server_passthrough: bool,
    /// Notifications a slow subscriber may fall behind by before losing some.
    pub event_capacity: usize,
    /// Size of each read from a connection, and so the largest chunk.
    pub read_buffer_size: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            client_passthrough: false,
            server_passthrough: false,
            event_capacity: 64,
            read_buffer_size: 8192,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 61614,
            upstream_host: "127.0.0.1".to_string(),
            upstream_port: 61613,
            proxy: ProxyOptions::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:61614");
        assert_eq!(config.upstream_addr(), "127.0.0.1:61613");
        assert!(!config.proxy.client_passthrough);
        assert!(!config.proxy.server_passthrough);
        assert_eq!(config.proxy.event_capacity, 64);
    }

    #[test]
    fn test_from_toml_file_fills_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "upstream_host = \"broker.internal\"\n\n[proxy]\nserver_passthrough = true"
        )
        .expect("write");

        let config = Config::from_file(file.path()).expect("load");
        assert_eq!(config.upstream_addr(), "broker.internal:61613");
        assert!(config.proxy.server_passthrough);
        assert!(!config.proxy.client_passthrough);
        assert_eq!(config.proxy.read_buffer_size, 8192);
    }

    #[test]
    fn test_to_file_round_trips_through_loader() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("proxy.json");

        let mut config = Config::default();
        config.listen_port = 7000;
        config.proxy.client_passthrough = true;
        config.to_file(&path).expect("save");

        let loaded = Config::from_file(&path).expect("load");
        assert_eq!(loaded.listen_port, 7000);
        assert_eq!(loaded.proxy, config.proxy);
    }
}
