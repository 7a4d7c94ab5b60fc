//! TOML configuration for `remap`.
//!
//! ```toml
//! [connection]
//! url = "https://localhost:9200"
//! # cloud_id = "deployment:ZXUtd2VzdC0x..."
//! # api_key = "..."
//!
//! [remap]
//! batch_size = 5000
//! slices = 3
//! replace_index = true
//! poll_interval_secs = 5
//!
//! [settings]
//! refresh_interval = "1s"
//! replicas = 1
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! Connection fields fall back to `ELASTICSEARCH_URL`, `CLOUD_ID` and
//! `ELASTICSEARCH_API_KEY` when absent from the file.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub remap: RemapConfig,
    #[serde(default)]
    pub settings: IndexSettingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            cloud_id: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemapConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_slices")]
    pub slices: u32,
    #[serde(default = "default_replace_index")]
    pub replace_index: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    #[serde(default = "default_target_suffix")]
    pub target_suffix: String,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            slices: default_slices(),
            replace_index: default_replace_index(),
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: None,
            target_suffix: default_target_suffix(),
        }
    }
}

fn default_batch_size() -> u32 {
    5000
}
fn default_slices() -> u32 {
    3
}
fn default_replace_index() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_target_suffix() -> String {
    "_remapped".to_string()
}

/// Index settings applied around the bulk copy.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexSettingsConfig {
    /// Refresh interval while copying.
    #[serde(default = "default_bulk_refresh_interval")]
    pub bulk_refresh_interval: String,
    /// Replica count while copying.
    #[serde(default)]
    pub bulk_replicas: u32,
    /// Refresh interval restored after the copy.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    /// Replica count restored after the copy.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

impl Default for IndexSettingsConfig {
    fn default() -> Self {
        Self {
            bulk_refresh_interval: default_bulk_refresh_interval(),
            bulk_replicas: 0,
            refresh_interval: default_refresh_interval(),
            replicas: default_replicas(),
        }
    }
}

fn default_bulk_refresh_interval() -> String {
    "-1".to_string()
}
fn default_refresh_interval() -> String {
    "1s".to_string()
}
fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults only, for commands that never talk to the cluster.
    pub fn minimal() -> Self {
        Self::default()
    }
}

impl ConnectionConfig {
    /// Resolve the HTTP endpoint. A cloud id wins over a plain URL.
    pub fn endpoint(&self) -> Result<String> {
        if let Some(cloud_id) = self.cloud_id.as_deref().filter(|s| !s.is_empty()) {
            return decode_cloud_id(cloud_id);
        }
        match self.url.as_deref().filter(|s| !s.is_empty()) {
            Some(url) => Ok(url.trim_end_matches('/').to_string()),
            None => bail!(
                "no Elasticsearch endpoint configured: set connection.url or connection.cloud_id \
                 (or ELASTICSEARCH_URL / CLOUD_ID)"
            ),
        }
    }

    /// Value for the `Authorization` header, if an API key is configured.
    ///
    /// Keys given as `id:secret` are base64-encoded; already encoded keys pass through.
    pub fn authorization(&self) -> Option<String> {
        let key = self.api_key.as_deref().filter(|s| !s.is_empty())?;
        let encoded = if key.contains(':') {
            STANDARD.encode(key)
        } else {
            key.to_string()
        };
        Some(format!("ApiKey {}", encoded))
    }
}

/// Decode an Elastic Cloud id (`label:base64(host$es_uuid$kibana_uuid)`).
pub fn decode_cloud_id(cloud_id: &str) -> Result<String> {
    let encoded = cloud_id
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(cloud_id);
    let bytes = STANDARD
        .decode(encoded)
        .with_context(|| "cloud_id is not valid base64")?;
    let decoded = String::from_utf8(bytes).with_context(|| "cloud_id is not valid UTF-8")?;
    let mut parts = decoded.split('$');
    let host = parts.next().unwrap_or_default();
    let es_uuid = parts.next().unwrap_or_default();
    if host.is_empty() || es_uuid.is_empty() {
        bail!("cloud_id does not contain a host and Elasticsearch id");
    }
    let (host, port) = match host.split_once(':') {
        Some((h, p)) => (h, p),
        None => (host, "443"),
    };
    if port == "443" {
        Ok(format!("https://{}.{}", es_uuid, host))
    } else {
        Ok(format!("https://{}.{}:{}", es_uuid, host, port))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_fallbacks(&mut config);
    validate(&config)?;

    Ok(config)
}

fn apply_env_fallbacks(config: &mut Config) {
    let conn = &mut config.connection;
    if conn.url.is_none() {
        conn.url = std::env::var("ELASTICSEARCH_URL").ok();
    }
    if conn.cloud_id.is_none() {
        conn.cloud_id = std::env::var("CLOUD_ID").ok();
    }
    if conn.api_key.is_none() {
        conn.api_key = std::env::var("ELASTICSEARCH_API_KEY").ok();
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.remap.batch_size == 0 {
        bail!("remap.batch_size must be > 0");
    }
    if config.remap.slices == 0 {
        bail!("remap.slices must be > 0");
    }
    if config.remap.poll_interval_secs == 0 {
        bail!("remap.poll_interval_secs must be > 0");
    }
    if config.remap.max_wait_secs == Some(0) {
        bail!("remap.max_wait_secs must be > 0 when set");
    }
    if config.remap.target_suffix.is_empty() {
        bail!("remap.target_suffix must not be empty");
    }
    if config.settings.refresh_interval.trim().is_empty() {
        bail!("settings.refresh_interval must not be empty");
    }
    if config.connection.timeout_secs == 0 {
        bail!("connection.timeout_secs must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let file = write_config("[connection]\nurl = \"http://localhost:9200/\"\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.remap.batch_size, 5000);
        assert_eq!(cfg.remap.slices, 3);
        assert!(cfg.remap.replace_index);
        assert_eq!(cfg.remap.poll_interval_secs, 5);
        assert_eq!(cfg.settings.bulk_refresh_interval, "-1");
        assert_eq!(cfg.settings.replicas, 1);
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert_eq!(cfg.connection.endpoint().unwrap(), "http://localhost:9200");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let file = write_config("[remap]\nbatch_size = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let file = write_config("[logging]\nformat = \"xml\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn cloud_id_decodes_to_https_endpoint() {
        let payload = STANDARD.encode("us-east-1.aws.found.io$abc123$kib456");
        let url = decode_cloud_id(&format!("my-deployment:{}", payload)).unwrap();
        assert_eq!(url, "https://abc123.us-east-1.aws.found.io");

        let payload = STANDARD.encode("example.com:9243$abc$def");
        let url = decode_cloud_id(&format!("x:{}", payload)).unwrap();
        assert_eq!(url, "https://abc.example.com:9243");
    }

    #[test]
    fn cloud_id_wins_over_url() {
        let conn = ConnectionConfig {
            url: Some("http://localhost:9200".into()),
            cloud_id: Some(format!("d:{}", STANDARD.encode("host.io$es$kb"))),
            ..Default::default()
        };
        assert_eq!(conn.endpoint().unwrap(), "https://es.host.io");
    }

    #[test]
    fn api_key_pairs_are_encoded() {
        let conn = ConnectionConfig {
            api_key: Some("id:secret".into()),
            ..Default::default()
        };
        assert_eq!(
            conn.authorization().unwrap(),
            format!("ApiKey {}", STANDARD.encode("id:secret"))
        );

        let conn = ConnectionConfig {
            api_key: Some("aWQ6c2VjcmV0".into()),
            ..Default::default()
        };
        assert_eq!(conn.authorization().unwrap(), "ApiKey aWQ6c2VjcmV0");
        assert_eq!(ConnectionConfig::default().authorization(), None);
    }
}
