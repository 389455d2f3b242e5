use anyhow::Context;
use metrika_storage::dumper::DumpMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Shared secret for `HashSHA256` signatures. Unset disables signing.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Snapshot file settings, used only with the in-memory backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    /// `0` (or less) dumps synchronously after every write.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: i64,
    #[serde(default)]
    pub restore: bool,
    /// Turns a failed synchronous dump into a `500` for the write request.
    #[serde(default)]
    pub fail_on_sync_error: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            file_storage_path: default_file_storage_path(),
            store_interval_secs: default_store_interval(),
            restore: false,
            fail_on_sync_error: false,
        }
    }
}

impl DumpConfig {
    pub fn mode(&self) -> DumpMode {
        DumpMode::from_interval_secs(self.store_interval_secs)
    }
}

/// Setting `path` selects the SQLite backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Append-only file receiving one JSON entry per line.
    #[serde(default)]
    pub file: Option<String>,
    /// Endpoint receiving each entry as a JSON `POST`.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_file_storage_path() -> String {
    "metrics.json".to_string()
}

fn default_store_interval() -> i64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            secret_key: None,
            dump: DumpConfig::default(),
            database: DatabaseConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Empty strings count as "unset" for optional settings.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{name} must be a boolean, got {other:?}"),
    }
}

impl ServerConfig {
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
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("ADDRESS").and_then(non_empty) {
            self.address = addr;
        }
        if let Some(key) = lookup("KEY") {
            self.secret_key = non_empty(key);
        }
        if let Some(path) = lookup("FILE_STORAGE_PATH").and_then(non_empty) {
            self.dump.file_storage_path = path;
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            self.dump.store_interval_secs = v
                .trim()
                .parse()
                .context("STORE_INTERVAL must be an integer")?;
        }
        if let Some(v) = lookup("RESTORE") {
            self.dump.restore = parse_bool("RESTORE", &v)?;
        }
        if let Some(dsn) = lookup("DATABASE_DSN") {
            self.database.path = non_empty(dsn);
        }
        if let Some(file) = lookup("AUDIT_FILE") {
            self.audit.file = non_empty(file);
        }
        if let Some(url) = lookup("AUDIT_URL") {
            self.audit.url = non_empty(url);
        }
        Ok(())
    }
}
