use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct VeristoreConfig {
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    /// Target capture width in pixels
    #[serde(default = "default_capture_width")]
    pub width: u32,

    /// Target capture height in pixels
    #[serde(default = "default_capture_height")]
    pub height: u32,

    /// Prefer the user-facing camera
    #[serde(default = "default_facing_user")]
    pub facing_user: bool,

    /// Request an audio track when a microphone is present
    #[serde(default = "default_want_audio")]
    pub want_audio: bool,

    /// Encoder slice interval in milliseconds
    #[serde(default = "default_slice_ms")]
    pub slice_ms: u64,

    /// Container/codec preference, most preferred first
    #[serde(default = "default_codec_preference")]
    pub codec_preference: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Countdown before recording starts, in seconds
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: u64,

    /// Fixed clip length in seconds. Minimum and maximum are deliberately
    /// equal: a short accidental clip cannot be submitted and no clip can
    /// run long.
    #[serde(default = "default_recording_seconds")]
    pub duration_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerificationConfig {
    /// Artifact types the upload sink accepts
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    /// Maximum artifact size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CheckoutConfig {
    /// ISO currency code used for charges
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Flat delivery cost for parcel-locker delivery
    #[serde(default = "default_locker_delivery_cost")]
    pub locker_delivery_cost: f64,

    /// Flat delivery cost for drop-point delivery
    #[serde(default = "default_drop_delivery_cost")]
    pub drop_delivery_cost: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Path for the durable cart snapshot
    #[serde(default = "default_cart_path")]
    pub cart_path: String,
}

impl VeristoreConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("veristore.toml")
    }

    /// Load configuration from a specific file path, layered with
    /// VERISTORE_* environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());

        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("VERISTORE").separator("__"));

        let config: VeristoreConfig = builder.build()?.try_deserialize()?;

        info!("Configuration loaded ({} source)", path.display());
        Ok(config)
    }

    /// Validate ranges that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recording.countdown_seconds == 0 {
            return Err(ConfigError::Message(
                "recording.countdown_seconds must be at least 1".into(),
            ));
        }
        if self.recording.duration_seconds == 0 {
            return Err(ConfigError::Message(
                "recording.duration_seconds must be at least 1".into(),
            ));
        }
        if self.media.slice_ms == 0 || 1000 % self.media.slice_ms != 0 {
            return Err(ConfigError::Message(
                "media.slice_ms must evenly divide 1000".into(),
            ));
        }
        if self.media.codec_preference.is_empty() {
            return Err(ConfigError::Message(
                "media.codec_preference must list at least one entry".into(),
            ));
        }
        if self.verification.max_upload_bytes == 0 {
            return Err(ConfigError::Message(
                "verification.max_upload_bytes must be positive".into(),
            ));
        }
        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "system.event_bus_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Serialize the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            width: default_capture_width(),
            height: default_capture_height(),
            facing_user: default_facing_user(),
            want_audio: default_want_audio(),
            slice_ms: default_slice_ms(),
            codec_preference: default_codec_preference(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: default_countdown_seconds(),
            duration_seconds: default_recording_seconds(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: default_allowed_mime_types(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            locker_delivery_cost: default_locker_delivery_cost(),
            drop_delivery_cost: default_drop_delivery_cost(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            cart_path: default_cart_path(),
        }
    }
}

fn default_capture_width() -> u32 {
    1280
}

fn default_capture_height() -> u32 {
    720
}

fn default_facing_user() -> bool {
    true
}

fn default_want_audio() -> bool {
    true
}

fn default_slice_ms() -> u64 {
    100
}

fn default_codec_preference() -> Vec<String> {
    vec![
        "video/webm;codecs=vp9".to_string(),
        "video/webm;codecs=vp8".to_string(),
        "video/webm".to_string(),
        "video/mp4".to_string(),
    ]
}

fn default_countdown_seconds() -> u64 {
    3
}

fn default_recording_seconds() -> u64 {
    8
}

fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "video/webm".to_string(),
        "video/mp4".to_string(),
        "video/quicktime".to_string(),
    ]
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_currency() -> String {
    "PLN".to_string()
}

fn default_locker_delivery_cost() -> f64 {
    12.99
}

fn default_drop_delivery_cost() -> f64 {
    9.99
}

fn default_event_bus_capacity() -> usize {
    100
}

fn default_cart_path() -> String {
    "./cart.json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VeristoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.duration_seconds, 8);
        assert_eq!(config.recording.countdown_seconds, 3);
        assert_eq!(config.media.slice_ms, 100);
        assert_eq!(config.media.codec_preference.len(), 4);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = VeristoreConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed: VeristoreConfig = toml::from_str(&toml).unwrap();
        assert_eq!(
            parsed.recording.duration_seconds,
            config.recording.duration_seconds
        );
        assert_eq!(parsed.media.codec_preference, config.media.codec_preference);
        assert_eq!(parsed.checkout.currency, config.checkout.currency);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut config = VeristoreConfig::default();
        config.recording.countdown_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = VeristoreConfig::default();
        config.media.slice_ms = 300;
        assert!(config.validate().is_err());

        let mut config = VeristoreConfig::default();
        config.media.codec_preference.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = VeristoreConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.recording.duration_seconds, 8);
    }
}
