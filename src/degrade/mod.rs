//! Circuit breaking.
//!
//! Each [`DegradeRule`] gets one [`CircuitBreaker`]:
//!
//! ```text
//!            threshold reached         retry timeout elapsed
//!  Closed ─────────────────────► Open ─────────────────────► HalfOpen
//!    ▲                            ▲                             │
//!    │                            └─────── probe failed ────────┤
//!    └───────────────────────────── probe succeeded ────────────┘
//! ```
//!
//! Breakers keep their own rolling counters, fed as calls complete, so they are
//! independent of the node tree.

mod breaker;
mod manager;
mod observer;

use bon::Builder;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

pub use breaker::CircuitBreaker;
pub use manager::DegradeRuleManager;
pub use observer::{ObserverRegistry, StateChangeObserver};

use crate::{
    config::WindowSpec,
    error::{
        EmptyResourceSnafu, InvalidMinRequestAmountSnafu, InvalidRatioSnafu,
        InvalidRetryTimeoutSnafu, InvalidThresholdSnafu, InvalidWindowSnafu, RuleError,
    },
};

/// What a breaker counts as a failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeStrategy {
    /// Ratio of calls slower than `max_allowed_rt_ms`.
    #[default]
    SlowRequestRatio,
    /// Ratio of calls that ended in an error.
    ErrorRatio,
    /// Number of calls that ended in an error.
    ErrorCount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// A circuit breaking rule.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `resource` | required | Resource the rule guards |
/// | `strategy` | `slow_request_ratio` | `slow_request_ratio`, `error_ratio` or `error_count` |
/// | `threshold` | required | Ratio in `[0, 1]`, or an error count |
/// | `retry_timeout_ms` | 10000 | How long the breaker stays open before probing |
/// | `min_request_amount` | 5 | Calls needed in the window before a ratio strategy may open |
/// | `stat_interval_ms` | 1000 | Span of the breaker's rolling window |
/// | `max_allowed_rt_ms` | 1000 | Calls at or above this response time count as slow |
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DegradeRule {
    #[builder(into)]
    pub resource: String,

    #[serde(default)]
    #[builder(default)]
    pub strategy: DegradeStrategy,

    pub threshold: f64,

    #[serde(default = "default_retry_timeout_ms")]
    #[builder(default = default_retry_timeout_ms())]
    pub retry_timeout_ms: u64,

    #[serde(default = "default_min_request_amount")]
    #[builder(default = default_min_request_amount())]
    pub min_request_amount: u64,

    #[serde(default = "default_stat_interval_ms")]
    #[builder(default = default_stat_interval_ms())]
    pub stat_interval_ms: u64,

    #[serde(default = "default_max_allowed_rt_ms")]
    #[builder(default = default_max_allowed_rt_ms())]
    pub max_allowed_rt_ms: u64,
}

const fn default_retry_timeout_ms() -> u64 {
    10_000
}

const fn default_min_request_amount() -> u64 {
    5
}

const fn default_stat_interval_ms() -> u64 {
    1000
}

const fn default_max_allowed_rt_ms() -> u64 {
    1000
}

impl DegradeRule {
    pub fn validate(&self) -> Result<(), RuleError> {
        ensure!(!self.resource.is_empty(), EmptyResourceSnafu);
        ensure!(
            self.threshold.is_finite() && self.threshold >= 0.0,
            InvalidThresholdSnafu {
                threshold: self.threshold
            }
        );
        if self.strategy != DegradeStrategy::ErrorCount {
            ensure!(
                self.threshold <= 1.0,
                InvalidRatioSnafu {
                    threshold: self.threshold
                }
            );
        }
        ensure!(self.retry_timeout_ms > 0, InvalidRetryTimeoutSnafu);
        ensure!(self.min_request_amount > 0, InvalidMinRequestAmountSnafu);
        self.window()?;
        Ok(())
    }

    pub(crate) fn window(&self) -> Result<WindowSpec, RuleError> {
        WindowSpec::new(1, self.stat_interval_ms).context(InvalidWindowSnafu)
    }
}
