use crate::selector::FailureCounting;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatecamConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the REST backend (MJPEG URLs are derived from it)
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Origin the dashboard is served from (WebSocket URLs mirror its scheme and host)
    #[serde(default = "default_page_origin")]
    pub page_origin: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// MJPEG load failures that trigger the WebSocket fallback
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Whether a rendered MJPEG frame resets the failure counter
    #[serde(default)]
    pub failure_counting: FailureCounting,

    /// Delay before the MJPEG loader tries the stream again after a failure
    #[serde(default = "default_mjpeg_retry_delay_ms")]
    pub mjpeg_retry_delay_ms: u64,

    /// TCP / WebSocket connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Explicit MJPEG URL, bypasses derivation
    #[serde(default)]
    pub mjpeg_url: Option<String>,

    /// Explicit WebSocket URL, bypasses derivation
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl StreamConfig {
    pub fn mjpeg_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mjpeg_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Directory of JPEG files played in a loop
    #[serde(default = "default_frames_dir")]
    pub frames_dir: String,

    /// Frames per second pushed to each client
    #[serde(default = "default_server_fps")]
    pub fps: u32,

    /// Tokens accepted on the stream endpoints; empty accepts any non-empty token
    #[serde(default)]
    pub accepted_tokens: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Optional file the session store persists to
    #[serde(default)]
    pub session_file: Option<String>,
}

impl GatecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("gatecam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("api.base_url", default_api_base_url())?
            .set_default("api.page_origin", default_page_origin())?
            .set_default("stream.failure_threshold", default_failure_threshold())?
            .set_default("stream.failure_counting", "cumulative")?
            .set_default(
                "stream.mjpeg_retry_delay_ms",
                default_mjpeg_retry_delay_ms(),
            )?
            .set_default("stream.connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("server.frames_dir", default_frames_dir())?
            .set_default("server.fps", default_server_fps())?
            .set_default("server.accepted_tokens", Vec::<String>::new())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // GATECAM_STREAM__FAILURE_THRESHOLD=5 etc.
            .add_source(
                Environment::with_prefix("GATECAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: GatecamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "Stream failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.stream.connect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Stream connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(ConfigError::Message(format!(
                "API base_url must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }

        if self.server.fps == 0 {
            return Err(ConfigError::Message(
                "Server fps must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for GatecamConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: default_api_base_url(),
                page_origin: default_page_origin(),
            },
            stream: StreamConfig {
                failure_threshold: default_failure_threshold(),
                failure_counting: FailureCounting::default(),
                mjpeg_retry_delay_ms: default_mjpeg_retry_delay_ms(),
                connect_timeout_ms: default_connect_timeout_ms(),
                mjpeg_url: None,
                ws_url: None,
            },
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
                frames_dir: default_frames_dir(),
                fps: default_server_fps(),
                accepted_tokens: Vec::new(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                session_file: None,
            },
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_page_origin() -> String {
    "http://localhost:8000".to_string()
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_mjpeg_retry_delay_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8000
}
fn default_frames_dir() -> String {
    "./frames".to_string()
}
fn default_server_fps() -> u32 {
    20
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GatecamConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.stream.failure_threshold, 3);
        assert_eq!(config.stream.failure_counting, FailureCounting::Cumulative);
        assert!(config.stream.mjpeg_url.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[api]
base_url = "http://gate.local:9000"

[stream]
failure_counting = "consecutive"
ws_url = "ws://gate.local:9000/ws/video?token=abc"

[server]
accepted_tokens = ["abc"]
"#
        )
        .unwrap();

        let config = GatecamConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.api.base_url, "http://gate.local:9000");
        assert_eq!(config.api.page_origin, default_page_origin());
        assert_eq!(config.stream.failure_counting, FailureCounting::Consecutive);
        assert_eq!(config.stream.failure_threshold, 3);
        assert_eq!(
            config.stream.ws_url.as_deref(),
            Some("ws://gate.local:9000/ws/video?token=abc")
        );
        assert_eq!(config.server.accepted_tokens, vec!["abc".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = GatecamConfig::load_from_file("/nonexistent/gatecam.toml").unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.stream.mjpeg_retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_validation() {
        let mut config = GatecamConfig::default();
        config.stream.failure_threshold = 0;
        assert!(config.validate().is_err());

        config.stream.failure_threshold = 3;
        config.api.base_url = "ftp://gate.local".to_string();
        assert!(config.validate().is_err());

        config.api.base_url = "https://gate.local".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_as_toml() {
        let rendered = GatecamConfig::default().to_toml().unwrap();

        assert!(rendered.contains("[stream]"));
        assert!(rendered.contains("failure_counting = \"cumulative\""));

        let parsed: GatecamConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.server.fps, 20);
    }
}
