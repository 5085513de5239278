//! # Configuration Module
//!
//! Handles loading and validating configuration from a TOML file plus
//! `MESHTASTIC_PINGER_*` environment overrides.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::dispatch::template::MessageTemplate;
use crate::error::{PingerError, Result};
use crate::radio::{ModemPreset, NodeId};

/// Config file used when neither the environment nor the command line names one
pub const DEFAULT_CONFIG_FILE: &str = "meshtastic_pinger.toml";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "MESHTASTIC_PINGER_CONFIG";

const ENV_PREFIX: &str = "MESHTASTIC_PINGER_";

/// Longest accepted interval or timeout, in seconds (one day)
const MAX_SECONDS: f64 = 86_400.0;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Node that receives the position messages (`!a1b2c3d4`, hex or decimal)
    #[serde(default, alias = "target")]
    pub target_node: Option<String>,

    /// Radio serial port; auto-detected when unset
    #[serde(default)]
    pub meshtastic_port: Option<String>,

    /// GPS serial port; auto-detected when unset
    #[serde(default)]
    pub gps_port: Option<String>,

    #[serde(default = "default_send_interval_seconds", alias = "interval")]
    pub send_interval_seconds: f64,

    #[serde(default = "default_gps_timeout_seconds", alias = "gps_timeout")]
    pub gps_timeout_seconds: f64,

    #[serde(default = "default_message_template")]
    pub message_template: String,

    #[serde(default = "default_radio_mode")]
    pub radio_mode: String,

    #[serde(default = "default_want_ack")]
    pub want_ack: bool,

    #[serde(default = "default_gps_baud_rate")]
    pub gps_baud_rate: u32,

    #[serde(default = "default_radio_connect_timeout_seconds")]
    pub radio_connect_timeout_seconds: f64,

    /// Directory for daily log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File the settings were read from; `None` when defaults were used
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

// Default value functions
fn default_send_interval_seconds() -> f64 { 60.0 }
fn default_gps_timeout_seconds() -> f64 { 15.0 }
fn default_message_template() -> String {
    "GPS {lat:.6f},{lon:.6f} sats {satellites} hdop {hdop:.1f} {time}".to_string()
}
fn default_radio_mode() -> String { "longfast".to_string() }
fn default_want_ack() -> bool { true }
fn default_gps_baud_rate() -> u32 { crate::serial::DEFAULT_GPS_BAUD_RATE }
fn default_radio_connect_timeout_seconds() -> f64 { 20.0 }

impl Default for Config {
    fn default() -> Self {
        Self {
            target_node: None,
            meshtastic_port: None,
            gps_port: None,
            send_interval_seconds: default_send_interval_seconds(),
            gps_timeout_seconds: default_gps_timeout_seconds(),
            message_template: default_message_template(),
            radio_mode: default_radio_mode(),
            want_ack: default_want_ack(),
            gps_baud_rate: default_gps_baud_rate(),
            radio_connect_timeout_seconds: default_radio_connect_timeout_seconds(),
            log_dir: None,
            source: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    ///
    /// A missing file is not an error: every field has a default except
    /// `target_node`, which may come from `MESHTASTIC_PINGER_TARGET_NODE`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File exists but cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use meshtastic_pinger::config::Config;
    ///
    /// let config = Config::load("meshtastic_pinger.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with an injectable environment lookup
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let mut config: Config = toml::from_str(&fs::read_to_string(path)?)?;
            config.source = Some(path.to_path_buf());
            config
        } else {
            Config::default()
        };

        config.apply_env(env)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Config file location: `MESHTASTIC_PINGER_CONFIG`, else the first
    /// command line argument, else [`DEFAULT_CONFIG_FILE`]
    pub fn resolve_path<F>(cli_arg: Option<String>, env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        env(CONFIG_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .or(cli_arg)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            env(&key).filter(|v| !v.trim().is_empty()).map(|v| {
                debug!("{} overrides configuration", key);
                (key, v)
            })
        };
        let seconds = |key: &str, value: &str| {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| PingerError::Config(format!("{} must be a number of seconds, got {:?}", key, value)))
        };

        if let Some((_, v)) = var("TARGET_NODE") {
            self.target_node = Some(v);
        }
        if let Some((_, v)) = var("RADIO_PORT") {
            self.meshtastic_port = Some(v);
        }
        if let Some((_, v)) = var("GPS_PORT") {
            self.gps_port = Some(v);
        }
        if let Some((key, v)) = var("INTERVAL") {
            self.send_interval_seconds = seconds(&key, &v)?;
        }
        if let Some((key, v)) = var("GPS_TIMEOUT") {
            self.gps_timeout_seconds = seconds(&key, &v)?;
        }
        if let Some((_, v)) = var("TEMPLATE") {
            self.message_template = v;
        }
        if let Some((_, v)) = var("RADIO_MODE") {
            self.radio_mode = v;
        }
        if let Some((_, v)) = var("WANT_ACK") {
            self.want_ack = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some((_, v)) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Blank strings mean "unset"
    fn normalize(&mut self) {
        for field in [&mut self.target_node, &mut self.meshtastic_port, &mut self.gps_port] {
            *field = field.take().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        }
        if self.radio_mode.trim().is_empty() {
            self.radio_mode = default_radio_mode();
        }
        if self.log_dir.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
            self.log_dir = None;
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`PingerError::Config`] if the target is missing or a
    /// broadcast address, the template or radio mode does not parse, or a
    /// number is out of range
    pub fn validate(&self) -> Result<()> {
        self.target_node_id()?;
        self.modem_preset()?;
        self.template()?;

        for (name, value) in [
            ("send_interval_seconds", self.send_interval_seconds),
            ("gps_timeout_seconds", self.gps_timeout_seconds),
            ("radio_connect_timeout_seconds", self.radio_connect_timeout_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 || value > MAX_SECONDS {
                return Err(PingerError::Config(format!(
                    "{} must be greater than 0 and at most {}, got {}",
                    name, MAX_SECONDS, value
                )));
            }
        }

        if self.gps_baud_rate == 0 {
            return Err(PingerError::Config("gps_baud_rate must be greater than 0".to_string()));
        }

        if let (Some(radio), Some(gps)) = (&self.meshtastic_port, &self.gps_port) {
            if radio.eq_ignore_ascii_case(gps) {
                return Err(PingerError::Config(format!(
                    "meshtastic_port and gps_port are both {}",
                    radio
                )));
            }
        }

        Ok(())
    }

    /// Parsed `target_node`
    pub fn target_node_id(&self) -> Result<NodeId> {
        match &self.target_node {
            Some(target) => target.parse(),
            None => Err(PingerError::Config(
                "target_node must be set in the configuration file or MESHTASTIC_PINGER_TARGET_NODE".to_string(),
            )),
        }
    }

    pub fn modem_preset(&self) -> Result<ModemPreset> {
        self.radio_mode.parse()
    }

    pub fn template(&self) -> Result<MessageTemplate> {
        MessageTemplate::parse(&self.message_template)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(self.send_interval_seconds)
    }

    pub fn gps_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.gps_timeout_seconds)
    }

    pub fn radio_connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.radio_connect_timeout_seconds)
    }
}
