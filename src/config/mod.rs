use crate::adapters::reolink::REOLINK_SOURCE;
use crate::error::Error;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub dedupe: DedupeConfig,
    #[serde(default)]
    pub reolink: ReolinkConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker AMQP port
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Virtual host
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Topic the authoritative detector publishes on (MQTT syntax)
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Connection name shown by the broker
    #[serde(default = "default_client_id")]
    pub client_id: Option<String>,
    /// Exchange the detector topics are routed through
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Connection attempts for a single publish
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Initial reconnect delay in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_topic() -> String {
    "frigate/events".to_string()
}

fn default_client_id() -> Option<String> {
    Some("scc-frigate".to_string())
}

fn default_exchange() -> String {
    "amq.topic".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_timeout() -> u64 {
    30000 // 30 seconds
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000 // 1 second
}

fn default_max_retry_delay() -> u64 {
    30000
}

/// Aggregation window configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupeConfig {
    /// Window for both the inactivity purge and the unconfirmed purge
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Detector whose events confirm and emit incidents
    #[serde(default = "default_authoritative_source")]
    pub authoritative_source: String,
}

fn default_window_seconds() -> u64 {
    15
}

fn default_authoritative_source() -> String {
    "frigate".to_string()
}

/// Corroborating Reolink AI-state feed
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReolinkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reolink_topic")]
    pub topic: String,
    /// Camera used when the poller does not name one
    #[serde(default)]
    pub camera_id: Option<String>,
}

fn default_reolink_topic() -> String {
    "reolink/ai_state".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Broker,
}

/// Notification sink configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,
    /// Routing key for published incidents
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Log
}

fn default_routing_key() -> String {
    "scc.incidents".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            dedupe: DedupeConfig::default(),
            reolink: ReolinkConfig::default(),
            sink: SinkConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            vhost: default_vhost(),
            topic: default_topic(),
            client_id: default_client_id(),
            exchange: default_exchange(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            authoritative_source: default_authoritative_source(),
        }
    }
}

impl Default for ReolinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_reolink_topic(),
            camera_id: None,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            routing_key: default_routing_key(),
        }
    }
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transport.host.trim().is_empty() {
            return Err(Error::Config("transport.host must not be empty".to_string()).into());
        }
        if self.dedupe.window_seconds == 0 {
            return Err(Error::Config("dedupe.window_seconds must be positive".to_string()).into());
        }
        if i64::try_from(self.dedupe.window_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .is_none()
        {
            return Err(Error::Config(format!(
                "dedupe.window_seconds is out of range: {}",
                self.dedupe.window_seconds
            ))
            .into());
        }
        if self.dedupe.authoritative_source.trim().is_empty() {
            return Err(
                Error::Config("dedupe.authoritative_source must not be empty".to_string()).into(),
            );
        }
        if self.reolink.enabled && self.dedupe.authoritative_source == REOLINK_SOURCE {
            return Err(Error::Config(format!(
                "dedupe.authoritative_source cannot be the corroborating {} feed",
                REOLINK_SOURCE
            ))
            .into());
        }
        if self.transport.retry_delay_ms > self.transport.max_retry_delay_ms {
            return Err(Error::Config(
                "transport.retry_delay_ms exceeds transport.max_retry_delay_ms".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(Error::Config(format!(
                    "Unsupported config file format {:?}, expected .toml or .json",
                    path
                ))
                .into());
            }
        }
        None => Config::default(),
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(extension: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("scc-config-{}.{}", uuid::Uuid::new_v4(), extension));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.transport.host, "localhost");
        assert_eq!(config.transport.port, 5672);
        assert_eq!(config.transport.topic, "frigate/events");
        assert_eq!(config.transport.client_id.as_deref(), Some("scc-frigate"));
        assert_eq!(config.dedupe.window_seconds, 15);
        assert_eq!(config.dedupe.authoritative_source, "frigate");
        assert_eq!(config.sink.kind, SinkKind::Log);
        assert_eq!(config.log_level, "info");
        assert!(!config.reolink.enabled);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let path = write_temp(
            "toml",
            r#"
            log_level = "debug"

            [transport]
            host = "broker.lan"
            username = "scc"
            password = "secret"

            [dedupe]
            window_seconds = 20

            [sink]
            kind = "broker"
            "#,
        );

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.transport.host, "broker.lan");
        assert_eq!(config.transport.port, 5672);
        assert_eq!(config.transport.username.as_deref(), Some("scc"));
        assert_eq!(config.dedupe.window_seconds, 20);
        assert_eq!(config.dedupe.authoritative_source, "frigate");
        assert_eq!(config.sink.kind, SinkKind::Broker);
        assert_eq!(config.sink.routing_key, "scc.incidents");
    }

    #[test]
    fn json_config_is_accepted() {
        let path = write_temp(
            "json",
            r#"{"reolink": {"enabled": true, "camera_id": "driveway"}}"#,
        );

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(config.reolink.enabled);
        assert_eq!(config.reolink.topic, "reolink/ai_state");
        assert_eq!(config.reolink.camera_id.as_deref(), Some("driveway"));
    }

    #[test]
    fn zero_window_is_rejected() {
        let path = write_temp("toml", "[dedupe]\nwindow_seconds = 0\n");
        let result = load_config(Some(&path));
        std::fs::remove_file(&path).ok();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("window_seconds"));
    }

    #[test]
    fn oversized_window_is_rejected() {
        let path = write_temp("toml", "[dedupe]\nwindow_seconds = 100000000000000000\n");
        let result = load_config(Some(&path));
        std::fs::remove_file(&path).ok();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn reolink_cannot_be_authoritative_while_enabled() {
        let mut config = Config::default();
        config.reolink.enabled = true;
        config.dedupe.authoritative_source = "reolink".to_string();
        assert!(config.validate().is_err());

        config.reolink.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_config_is_rejected() {
        let path = write_temp("yml", "dedupe:\n  window_seconds: 15\n");
        let result = load_config(Some(&path));
        std::fs::remove_file(&path).ok();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("expected .toml or .json"));
    }
}
