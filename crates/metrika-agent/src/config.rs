use crate::retry::RetryPolicy;
use anyhow::Context;
use metrika_common::codec::Compression;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Server `host:port` or full base URL.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default)]
    pub compression: Compression,
    /// Shared secret for `HashSHA256` body signatures.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Number of concurrent batch senders.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_server_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn default_batch_size() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            compression: Compression::default(),
            secret_key: None,
            rate_limit: default_rate_limit(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl AgentConfig {
    /// Loads the TOML file at `path`; a missing file yields the defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            tracing::info!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        Ok(config)
    }

    /// Overrides fields from environment-style variables.
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("ADDRESS") {
            self.server_address = addr;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = v.parse().context("POLL_INTERVAL must be an integer")?;
        }
        if let Some(v) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = v.parse().context("REPORT_INTERVAL must be an integer")?;
        }
        if let Some(v) = lookup("COMPRESSION_TYPE") {
            self.compression = v
                .parse()
                .map_err(|e| anyhow::anyhow!("COMPRESSION_TYPE: {e}"))?;
        }
        if let Some(key) = lookup("KEY") {
            self.secret_key = Some(key);
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.rate_limit = v.parse().context("RATE_LIMIT must be an integer")?;
        }
        if let Some(v) = lookup("BATCH_SIZE") {
            self.batch_size = v.parse().context("BATCH_SIZE must be an integer")?;
        }
        Ok(())
    }

    /// Batch endpoint derived from `server_address`.
    pub fn updates_url(&self) -> String {
        let addr = self.server_address.trim().trim_end_matches('/');
        if addr.contains("://") {
            format!("{addr}/updates/")
        } else {
            format!("http://{addr}/updates/")
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_base_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_file_is_empty() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.server_address, "localhost:8080");
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.report_interval_secs, 10);
        assert_eq!(config.rate_limit, 1);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_ms, 2000);
        assert_eq!(config.compression, Compression::None);
        assert!(config.secret_key.is_none());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "server_address = \"10.0.0.5:9000\"\ncompression = \"gzip\"\nrate_limit = 4\n",
        )
        .unwrap();
        let config = AgentConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server_address, "10.0.0.5:9000");
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.batch_size, 3);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AgentConfig::load("/nonexistent/agent.toml").unwrap();
        assert_eq!(config.server_address, "localhost:8080");
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("ADDRESS", "metrics:8081"),
            ("KEY", "secret"),
            ("RATE_LIMIT", "8"),
            ("COMPRESSION_TYPE", "gzip"),
        ]
        .into_iter()
        .collect();
        let mut config = AgentConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server_address, "metrics:8081");
        assert_eq!(config.secret_key.as_deref(), Some("secret"));
        assert_eq!(config.rate_limit, 8);
        assert_eq!(config.compression, Compression::Gzip);
    }

    #[test]
    fn env_rejects_garbage_numbers() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_env(|k| (k == "POLL_INTERVAL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL"));
    }

    #[test]
    fn updates_url_adds_scheme_when_missing() {
        let mut config = AgentConfig::default();
        assert_eq!(config.updates_url(), "http://localhost:8080/updates/");
        config.server_address = "https://metrics.example.com/".to_string();
        assert_eq!(config.updates_url(), "https://metrics.example.com/updates/");
    }
}
