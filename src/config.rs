use bon::Builder;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::error::{
    ConfigError, IntervalNotDivisibleSnafu, InvalidColdFactorSnafu, OccupyTimeoutTooLargeSnafu,
    ParseSnafu, ZeroIntervalSnafu, ZeroSampleCountSnafu,
};

/// Engine-wide statistic and admission parameters.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `sample_count` | 2 | Buckets in the second-level window |
/// | `interval_ms` | 1000 | Span of the second-level window |
/// | `occupy_timeout_ms` | 500 | Longest wait a prioritized caller may borrow; must not exceed `interval_ms` |
/// | `statistic_max_rt_ms` | 5000 | Response times are clamped to this value; also the initial bucket min rt |
/// | `cold_factor` | 3 | Default cold factor for warm-up rules that do not set one |
///
/// # Example
///
/// ```rust
/// use flowguard::config::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .sample_count(4)
///     .occupy_timeout_ms(250)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    #[builder(default = default_sample_count())]
    pub sample_count: u32,

    #[builder(default = default_interval_ms())]
    pub interval_ms: u64,

    #[builder(default = default_occupy_timeout_ms())]
    pub occupy_timeout_ms: u64,

    #[builder(default = default_statistic_max_rt_ms())]
    pub statistic_max_rt_ms: u64,

    #[builder(default = default_cold_factor())]
    pub cold_factor: u32,
}

const fn default_sample_count() -> u32 {
    2
}

const fn default_interval_ms() -> u64 {
    1000
}

const fn default_occupy_timeout_ms() -> u64 {
    500
}

const fn default_statistic_max_rt_ms() -> u64 {
    5000
}

const fn default_cold_factor() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            interval_ms: default_interval_ms(),
            occupy_timeout_ms: default_occupy_timeout_ms(),
            statistic_max_rt_ms: default_statistic_max_rt_ms(),
            cold_factor: default_cold_factor(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(raw).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window()?;
        ensure!(
            self.occupy_timeout_ms <= self.interval_ms,
            OccupyTimeoutTooLargeSnafu {
                occupy_timeout_ms: self.occupy_timeout_ms,
                interval_ms: self.interval_ms,
            }
        );
        ensure!(
            self.cold_factor > 1,
            InvalidColdFactorSnafu {
                cold_factor: self.cold_factor
            }
        );
        Ok(())
    }

    /// The second-level window shape described by this configuration.
    pub fn window(&self) -> Result<WindowSpec, ConfigError> {
        WindowSpec::new(self.sample_count, self.interval_ms)
    }
}

/// A validated window shape: `sample_count` buckets evenly covering `interval_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    sample_count: u32,
    interval_ms: u64,
}

impl WindowSpec {
    pub fn new(sample_count: u32, interval_ms: u64) -> Result<Self, ConfigError> {
        ensure!(sample_count > 0, ZeroSampleCountSnafu);
        ensure!(interval_ms > 0, ZeroIntervalSnafu);
        ensure!(
            interval_ms % u64::from(sample_count) == 0,
            IntervalNotDivisibleSnafu {
                interval_ms,
                sample_count
            }
        );
        Ok(Self {
            sample_count,
            interval_ms,
        })
    }

    /// Sixty one-second buckets, used for minute totals and per-second snapshots.
    pub const fn minute() -> Self {
        Self {
            sample_count: 60,
            interval_ms: 60_000,
        }
    }

    pub const fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub const fn bucket_length_ms(&self) -> u64 {
        self.interval_ms / self.sample_count as u64
    }

    pub fn interval_sec(&self) -> f64 {
        self.interval_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window().unwrap().bucket_length_ms(), 500);
        assert_eq!(EngineConfig::builder().build(), config);
    }

    #[test]
    fn occupy_timeout_cannot_exceed_interval() {
        let config = EngineConfig::builder()
            .interval_ms(400)
            .sample_count(2)
            .occupy_timeout_ms(500)
            .build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OccupyTimeoutTooLarge { .. })
        ));
    }

    #[test]
    fn window_must_divide_evenly() {
        assert!(matches!(
            WindowSpec::new(3, 1000),
            Err(ConfigError::IntervalNotDivisible { .. })
        ));
        assert!(matches!(
            WindowSpec::new(0, 1000),
            Err(ConfigError::ZeroSampleCount)
        ));
        assert_eq!(WindowSpec::new(4, 1000).unwrap().bucket_length_ms(), 250);
    }

    #[test]
    fn parses_partial_json() {
        let config = EngineConfig::from_json(r#"{ "sample_count": 5 }"#).unwrap();
        assert_eq!(config.sample_count, 5);
        assert_eq!(config.interval_ms, 1000);

        assert!(matches!(
            EngineConfig::from_json(r#"{ "sample_count": "x" }"#),
            Err(ConfigError::Parse { .. })
        ));
        assert!(EngineConfig::from_json(r#"{ "cold_factor": 1 }"#).is_err());
    }
}
