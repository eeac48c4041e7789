//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.triagewatch.toml` files.

use crate::analysis::ProgressPolicy;
use crate::api::ApiClientConfig;
use crate::channel::{Protocol, PushChannelConfig};
use crate::cli::OutputFormat;
use crate::models::{default_roster, AgentDescriptor};
use crate::session::SessionOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".triagewatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend HTTP API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Push channel settings.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Session behaviour.
    #[serde(default)]
    pub session: SessionConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Backend HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend.
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_seconds: default_api_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

/// Push channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket (or HTTP, for Socket.IO) URL of the push endpoint.
    #[serde(default = "default_ws_url")]
    pub url: String,

    /// Wire framing.
    #[serde(default)]
    pub protocol: Protocol,

    /// Connect + handshake timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            protocol: Protocol::default(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://localhost:5000".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

/// Progress regression handling, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPolicySetting {
    #[default]
    Accept,
    Clamp,
}

impl From<ProgressPolicySetting> for ProgressPolicy {
    fn from(setting: ProgressPolicySetting) -> Self {
        match setting {
            ProgressPolicySetting::Accept => ProgressPolicy::AcceptAsGiven,
            ProgressPolicySetting::Clamp => ProgressPolicy::ClampRegression,
        }
    }
}

/// Session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Delay between the terminal transition and fetching results.
    #[serde(default = "default_redirect_delay")]
    pub redirect_delay_ms: u64,

    /// How many times to re-initialize after a session-level error.
    #[serde(default = "default_start_retries")]
    pub start_retries: usize,

    /// What to do when an agent's progress moves backwards.
    #[serde(default)]
    pub progress_policy: ProgressPolicySetting,

    /// Ask the backend for its agent roster instead of using `roster`.
    #[serde(default)]
    pub fetch_roster: bool,

    /// Agents to track, in display order.
    #[serde(default = "default_roster")]
    pub roster: Vec<AgentDescriptor>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            redirect_delay_ms: default_redirect_delay(),
            start_retries: default_start_retries(),
            progress_policy: ProgressPolicySetting::default(),
            fetch_roster: false,
            roster: default_roster(),
        }
    }
}

fn default_redirect_delay() -> u64 {
    2000
}

fn default_start_retries() -> usize {
    1
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output format.
    #[serde(default)]
    pub format: OutputFormat,

    /// Output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Include each agent's raw result text.
    #[serde(default)]
    pub include_raw_results: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            output: default_output(),
            include_raw_results: false,
        }
    }
}

fn default_output() -> String {
    "triage_report.md".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.triagewatch.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings; only
    /// explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.api_url {
            self.api.base_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.api.timeout_seconds = timeout;
        }

        if let Some(ref url) = args.ws_url {
            self.channel.url = url.clone();
        }
        if let Some(protocol) = args.protocol {
            self.channel.protocol = protocol;
        }

        if let Some(retries) = args.retries {
            self.session.start_retries = retries;
        }
        if let Some(delay) = args.redirect_delay_ms {
            self.session.redirect_delay_ms = delay;
        }
        if args.clamp_progress {
            self.session.progress_policy = ProgressPolicySetting::Clamp;
        }
        if args.fetch_roster {
            self.session.fetch_roster = true;
        }

        if let Some(format) = args.format {
            self.report.format = format;
        }
        if let Some(ref output) = args.output {
            self.report.output = output.display().to_string();
        }
        if args.include_raw {
            self.report.include_raw_results = true;
        }
    }

    pub fn api_client_config(&self) -> ApiClientConfig {
        ApiClientConfig {
            base_url: self.api.base_url.clone(),
            timeout_seconds: self.api.timeout_seconds,
        }
    }

    pub fn push_channel_config(&self) -> PushChannelConfig {
        PushChannelConfig {
            url: self.channel.url.clone(),
            protocol: self.channel.protocol,
            connect_timeout: Duration::from_secs(self.channel.connect_timeout_seconds),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            redirect_delay: Duration::from_millis(self.session.redirect_delay_ms),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.channel.protocol, Protocol::SocketIo);
        assert_eq!(config.session.redirect_delay_ms, 2000);
        assert_eq!(config.session.roster.len(), 6);
        assert_eq!(config.session.roster[0].id, "safety");
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[api]
base_url = "https://triage.example.com"

[channel]
url = "wss://triage.example.com/events"
protocol = "json"

[session]
progress_policy = "clamp"
roster = [
    { id = "safety", name = "Emergency Triage AI" },
    { id = "cardiology", name = "Heart Specialist AI" },
]

[report]
format = "json"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.api.base_url, "https://triage.example.com");
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.channel.protocol, Protocol::Json);
        assert_eq!(config.session.progress_policy, ProgressPolicySetting::Clamp);
        assert_eq!(config.session.roster.len(), 2);
        assert_eq!(config.session.start_retries, 1);
        assert_eq!(config.report.format, OutputFormat::Json);
        assert_eq!(config.report.output, "triage_report.md");
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[session]\nredirect_delay_ms = 0\n",
        )
        .unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.session.redirect_delay_ms, 0);
        assert_eq!(config.session_options().redirect_delay, Duration::ZERO);

        std::fs::write(dir.path().join(CONFIG_FILE), "[session\n").unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_merge_with_args_overrides_only_given_values() {
        let mut config = Config::default();
        config.api.timeout_seconds = 45;

        let mut args = crate::cli::tests::make_args();
        args.ws_url = Some("ws://10.0.0.2:5000".to_string());
        args.clamp_progress = true;
        args.output = Some(PathBuf::from("out.json"));

        config.merge_with_args(&args);
        assert_eq!(config.api.timeout_seconds, 45);
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.channel.url, "ws://10.0.0.2:5000");
        assert_eq!(config.session.progress_policy, ProgressPolicySetting::Clamp);
        assert_eq!(config.report.output, "out.json");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[channel]"));
        assert!(toml_str.contains("[session]"));
        assert!(toml_str.contains("Heart Specialist AI"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.session.roster, default_roster());
    }
}
