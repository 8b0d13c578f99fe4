//! Configuration management for the live recognition client.
//!
//! Settings start from defaults and are overridden by `ISL_LIVE_*` environment
//! variables. A small user configuration (preferred domain and camera) is
//! persisted as JSON between runs.

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::protocol::Domain;
use crate::{OurError, OurResult};

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Configuration settings for the client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Web server host address
    pub host: String,
    /// Web server port
    pub port: u16,
    /// Enable debug logging
    pub debug: bool,
    /// Base URL of the inference service
    pub api_base: String,
    /// Camera index handed to the capture backend
    pub camera_index: u32,
    /// Preferred capture width
    pub preferred_width: u32,
    /// Preferred capture height
    pub preferred_height: u32,
    /// Time between frame submissions
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub capture_interval: Duration,
    /// Time between gauge updates
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub telemetry_interval: Duration,
    /// Width of the frame-rate window
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub frame_rate_window: Duration,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Domain selected when the client starts
    pub default_domain: Domain,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            debug: false,
            api_base: DEFAULT_API_BASE.to_string(),
            camera_index: 0,
            preferred_width: 1280,
            preferred_height: 720,
            capture_interval: Duration::from_millis(900),
            telemetry_interval: Duration::from_millis(1200),
            frame_rate_window: Duration::from_millis(1000),
            jpeg_quality: 80,
            default_domain: Domain::Alphabet,
        }
    }
}

/// User configuration that persists across application restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Last domain picked by the user
    pub domain: Option<Domain>,
    /// Preferred camera
    pub camera_index: Option<u32>,
}

impl Settings {
    /// Create a new instance of Settings with environment variable overrides
    pub fn new() -> OurResult<Self> {
        let mut settings = Settings::default();

        let user_config = Self::load_user_config();
        if let Some(domain) = user_config.domain {
            settings.default_domain = domain;
        }
        if let Some(camera_index) = user_config.camera_index {
            settings.camera_index = camera_index;
        }

        if let Ok(api_base) = env::var("ISL_LIVE_API_BASE") {
            settings.api_base = api_base;
        }
        if let Ok(host) = env::var("ISL_LIVE_HOST") {
            settings.host = host;
        }
        if let Ok(port) = env::var("ISL_LIVE_PORT") {
            settings.port = parse_env("ISL_LIVE_PORT", &port)?;
        }
        if let Ok(debug) = env::var("ISL_LIVE_DEBUG") {
            settings.debug = parse_env("ISL_LIVE_DEBUG", &debug)?;
        }
        if let Ok(camera_index) = env::var("ISL_LIVE_CAMERA_INDEX") {
            settings.camera_index = parse_env("ISL_LIVE_CAMERA_INDEX", &camera_index)?;
        }
        if let Ok(interval) = env::var("ISL_LIVE_CAPTURE_INTERVAL_MS") {
            settings.capture_interval =
                Duration::from_millis(parse_env("ISL_LIVE_CAPTURE_INTERVAL_MS", &interval)?);
        }
        if let Ok(quality) = env::var("ISL_LIVE_JPEG_QUALITY") {
            settings.jpeg_quality = parse_env("ISL_LIVE_JPEG_QUALITY", &quality)?;
        }
        if let Ok(domain) = env::var("ISL_LIVE_DOMAIN") {
            settings.default_domain = domain.parse()?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the capture pipeline cannot work with
    pub fn validate(&self) -> OurResult<()> {
        self.api_base_url()?;
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(OurError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        if self.capture_interval.is_zero()
            || self.telemetry_interval.is_zero()
            || self.frame_rate_window.is_zero()
        {
            return Err(OurError::Config("Intervals must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> OurResult<Url> {
        let url = Url::parse(&self.api_base)?;
        if url.cannot_be_a_base() {
            return Err(OurError::Config(format!(
                "API base '{}' cannot be used as a base URL",
                self.api_base
            )));
        }
        Ok(url)
    }

    /// Get the path to the user config file
    pub fn get_config_path() -> PathBuf {
        if let Ok(config_path_override) = env::var("ISL_LIVE_CONFIG_PATH") {
            return PathBuf::from(config_path_override);
        }

        // Default to ~/.config/isl-live.json
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("isl-live.json")
    }

    /// Load user configuration from the default location
    pub fn load_user_config() -> UserConfig {
        Self::load_user_config_from(&Self::get_config_path())
    }

    /// Load user configuration, falling back to defaults on any problem
    pub fn load_user_config_from(config_path: &Path) -> UserConfig {
        if !config_path.exists() {
            return UserConfig::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => match serde_json::from_str::<UserConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse user config from {config_path:?}: {e}");
                    UserConfig::default()
                }
            },
            Err(e) => {
                warn!("Failed to read user config from {config_path:?}: {e}");
                UserConfig::default()
            }
        }
    }

    /// Save user configuration to the default location
    pub fn save_user_config(config: &UserConfig) -> OurResult<PathBuf> {
        let config_path = Self::get_config_path();
        Self::save_user_config_to(config, &config_path)?;
        Ok(config_path)
    }

    pub fn save_user_config_to(config: &UserConfig, config_path: &Path) -> OurResult<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(config)?;
        fs::write(config_path, contents)?;

        info!("Saved user config to {config_path:?}");
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> OurResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| OurError::Config(format!("Invalid value '{value}' for {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.api_base, "http://localhost:8000");
        assert_eq!(settings.capture_interval, Duration::from_millis(900));
        assert_eq!(settings.telemetry_interval, Duration::from_millis(1200));
        assert_eq!(settings.frame_rate_window, Duration::from_millis(1000));
        assert_eq!(settings.jpeg_quality, 80);
        assert_eq!(
            (settings.preferred_width, settings.preferred_height),
            (1280, 720)
        );
        assert_eq!(settings.default_domain, Domain::Alphabet);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let settings = Settings {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(OurError::Config(_))));

        let settings = Settings {
            frame_rate_window: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(OurError::Config(_))));

        let settings = Settings {
            api_base: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(OurError::Url(_))));

        let settings = Settings {
            api_base: "mailto:someone@example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(OurError::Config(_))));
    }

    #[test]
    fn test_serialization_uses_milliseconds() {
        let settings = Settings::default();
        let json = serde_json::to_value(&settings).expect("Failed to serialize");
        assert_eq!(json["capture_interval"], 900);

        let deserialized: Settings = serde_json::from_value(json).expect("Failed to deserialize");
        assert_eq!(deserialized.capture_interval, settings.capture_interval);
        assert_eq!(deserialized.port, settings.port);
    }

    #[test]
    fn test_user_config_round_trip_on_disk() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("isl-live.json");

        assert_eq!(Settings::load_user_config_from(&path), UserConfig::default());

        let config = UserConfig {
            domain: Some(Domain::Numeral),
            camera_index: Some(2),
        };
        Settings::save_user_config_to(&config, &path).expect("Failed to save config");
        assert_eq!(Settings::load_user_config_from(&path), config);
    }

    #[test]
    fn test_corrupt_user_config_falls_back_to_default() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("isl-live.json");
        fs::write(&path, "{ not json").expect("Failed to write");
        assert_eq!(Settings::load_user_config_from(&path), UserConfig::default());
    }
}
