use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable that switches the HAL into the audio-disabled test mode.
pub const ENV_DISABLE_AUDIO: &str = "TINYHAL_DISABLE_AUDIO";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HalConfig {
    // 测试模式：不打开任何硬件设备，只模拟时序
    pub disable_audio: bool,
    pub output: PeriodDefaults,
    pub input: InputDefaults,
    pub compress: CompressDefaults,
}

/// Hardware geometry used when a route leaves a value unspecified (zero).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct PeriodDefaults {
    /// Frames per period
    pub period_size: u32,
    pub period_count: u32,
    pub channel_count: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct InputDefaults {
    pub period_size: u32,
    pub period_count: u32,
    pub channel_count: u32,
    pub sample_rate: u32,
    /// Buffer size in bytes reported before the input source is known.
    /// Must suit both PCM and compressed inputs since the framework does not
    /// re-read it after a source change.
    pub default_buffer_size: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CompressDefaults {
    /// Fragment size in frames
    pub fragment_size: u32,
    pub fragments: u32,
    /// Upper bound on how long a compressed read may block waiting for data
    pub max_poll_wait_ms: u32,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            disable_audio: false,
            output: PeriodDefaults::default(),
            input: InputDefaults::default(),
            compress: CompressDefaults::default(),
        }
    }
}

impl Default for PeriodDefaults {
    fn default() -> Self {
        Self {
            period_size: 256,
            period_count: 4,
            channel_count: 2,
            sample_rate: 48000,
        }
    }
}

impl Default for InputDefaults {
    fn default() -> Self {
        Self {
            period_size: 256,
            period_count: 4,
            channel_count: 1,
            sample_rate: 48000,
            default_buffer_size: 1024,
        }
    }
}

impl Default for CompressDefaults {
    fn default() -> Self {
        Self {
            fragment_size: 4096,
            fragments: 1,
            max_poll_wait_ms: 2100,
        }
    }
}

impl HalConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse HAL configuration")
    }

    /// Read the configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read HAL configuration '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid HAL configuration '{}'", path.display()))
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_DISABLE_AUDIO) {
            let value = value.trim();
            self.disable_audio = value.eq_ignore_ascii_case("true") || value == "1";
            log::info!("{} = {} (disable_audio={})", ENV_DISABLE_AUDIO, value, self.disable_audio);
        }
        self
    }
}
