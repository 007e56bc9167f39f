use serde::{Deserialize, Serialize};

use crate::{RemixError, Result};

/// Top-level configuration structure for the audio core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub spectrum: SpectrumConfig,
}

impl AppConfig {
    /// Parses a configuration document from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| RemixError::internal(format!("invalid configuration: {err}")))
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| RemixError::internal(format!("configuration serialization: {err}")))
    }
}

/// Configuration for module loading and effect invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where the DSP module binary is fetched from.
    pub module_path: String,
    pub default_volume: u8,
    pub default_tempo_percent: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_path: "assets/effects.rxdm".to_string(),
            default_volume: 100,
            default_tempo_percent: 100,
        }
    }
}

/// Configuration for the spectrum sampling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumConfig {
    /// FFT window size; must be a power of two.
    pub fft_size: usize,
    /// Inter-frame smoothing constant in [0, 1).
    pub smoothing: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.engine.default_volume, 100);
        assert_eq!(config.engine.default_tempo_percent, 100);
        assert!(config.spectrum.fft_size.is_power_of_two());
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let mut config = AppConfig::default();
        config.engine.module_path = "remote/effects.rxdm".to_string();
        config.spectrum.fft_size = 512;

        let text = config.to_json().unwrap();
        let parsed = AppConfig::from_json(&text).unwrap();
        assert_eq!(parsed.engine.module_path, "remote/effects.rxdm");
        assert_eq!(parsed.spectrum.fft_size, 512);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed = AppConfig::from_json("{}").unwrap();
        assert_eq!(parsed.engine.module_path, "assets/effects.rxdm");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(AppConfig::from_json("{not json").is_err());
    }
}
