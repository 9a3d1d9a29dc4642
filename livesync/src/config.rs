//! TOML configuration for the `livesync` binary and embedding hosts.
//!
//! ```toml
//! [reference]
//! kind = "ntp"
//! frame_rate = { numerator = 30000, denominator = 1001, drop_frame = true }
//! ntp_server = "pool.ntp.org"
//!
//! [genlock]
//! enabled = true
//! sync_rate = { numerator = 60, denominator = 1 }
//!
//! [sources]
//! default_buffer_size = 5
//!
//! [network]
//! bind = "0.0.0.0:9000"
//! ```
//!
//! Every section and key is optional. Missing values take the defaults
//! shown by [`LiveSyncConfig::default`].

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::NetworkTiming;
use crate::reference::ltc_source::DEFAULT_SAMPLE_RATE;
use crate::reference::ntp::source::DEFAULT_SERVER;
use crate::source::timed_source::DEFAULT_BUFFER_SIZE;
use crate::time::{FrameRate, StandardFrameRate, TimeError};

pub const DEFAULT_BIND: &str = "0.0.0.0:9000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid frame rate: {0}")]
    Invalid(#[from] TimeError),

    #[error("buffer size limits {min} > {max}")]
    BufferLimits { min: usize, max: usize },
}

/// A frame rate as written in the file. Validated by
/// [`LiveSyncConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSetting {
    pub numerator: u32,
    pub denominator: u32,
    #[serde(default)]
    pub drop_frame: bool,
}

impl RateSetting {
    /// # Errors
    ///
    /// See [`FrameRate::with_drop_frame`].
    pub fn to_frame_rate(self) -> Result<FrameRate, TimeError> {
        FrameRate::with_drop_frame(self.numerator, self.denominator, self.drop_frame)
    }
}

impl From<FrameRate> for RateSetting {
    fn from(rate: FrameRate) -> Self {
        Self {
            numerator: rate.numerator(),
            denominator: rate.denominator(),
            drop_frame: rate.is_drop_frame(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    #[default]
    Ntp,
    Ltc,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub kind: ReferenceKind,
    pub frame_rate: RateSetting,
    pub ntp_server: String,
    pub ltc_sample_rate: u32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            kind: ReferenceKind::default(),
            frame_rate: FrameRate::default().into(),
            ntp_server: DEFAULT_SERVER.to_owned(),
            ltc_sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenlockConfig {
    pub enabled: bool,
    pub sync_rate: RateSetting,
}

impl Default for GenlockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_rate: FrameRate::from(StandardFrameRate::Fps60).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub default_buffer_size: usize,
    pub min_buffer_size: Option<usize>,
    pub max_buffer_size: Option<usize>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            min_buffer_size: None,
            max_buffer_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind: String,
    pub heartbeat_interval_ms: u64,
    pub peer_timeout_ms: u64,
    pub retransmit_timeout_ms: u64,
    pub max_retransmit_attempts: u32,
}

impl NetworkConfig {
    #[must_use]
    pub fn timing(&self) -> NetworkTiming {
        NetworkTiming {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            peer_timeout: Duration::from_millis(self.peer_timeout_ms),
            retransmit_timeout: Duration::from_millis(self.retransmit_timeout_ms),
            max_retransmit_attempts: self.max_retransmit_attempts,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let timing = NetworkTiming::default();
        Self {
            bind: DEFAULT_BIND.to_owned(),
            heartbeat_interval_ms: duration_ms(timing.heartbeat_interval),
            peer_timeout_ms: duration_ms(timing.peer_timeout),
            retransmit_timeout_ms: duration_ms(timing.retransmit_timeout),
            max_retransmit_attempts: timing.max_retransmit_attempts,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSyncConfig {
    pub reference: ReferenceConfig,
    pub genlock: GenlockConfig,
    pub sources: SourcesConfig,
    pub network: NetworkConfig,
}

impl LiveSyncConfig {
    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as for
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, or any error from
    /// [`validate`](Self::validate).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if a value has no TOML representation.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the frame rates and buffer limits.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for an unusable frame rate and
    /// [`ConfigError::BufferLimits`] when the minimum exceeds the maximum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reference_rate()?;
        self.sync_rate()?;
        if let (Some(min), Some(max)) = (self.sources.min_buffer_size, self.sources.max_buffer_size)
            && min > max
        {
            return Err(ConfigError::BufferLimits { min, max });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// As for [`RateSetting::to_frame_rate`].
    pub fn reference_rate(&self) -> Result<FrameRate, TimeError> {
        self.reference.frame_rate.to_frame_rate()
    }

    /// # Errors
    ///
    /// As for [`RateSetting::to_frame_rate`].
    pub fn sync_rate(&self) -> Result<FrameRate, TimeError> {
        self.genlock.sync_rate.to_frame_rate()
    }
}
