use std::sync::Arc;

use snafu::Snafu;

use crate::{degrade::DegradeRule, flow::FlowRule};

/// Errors raised while validating window or engine parameters.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("sample count must be greater than zero"))]
    ZeroSampleCount,

    #[snafu(display("window interval must be greater than zero"))]
    ZeroInterval,

    #[snafu(display("interval {interval_ms}ms is not divisible by sample count {sample_count}"))]
    IntervalNotDivisible { interval_ms: u64, sample_count: u32 },

    #[snafu(display(
        "occupy timeout {occupy_timeout_ms}ms exceeds the statistic interval {interval_ms}ms"
    ))]
    OccupyTimeoutTooLarge {
        occupy_timeout_ms: u64,
        interval_ms: u64,
    },

    #[snafu(display("cold factor must be greater than 1, got {cold_factor}"))]
    InvalidColdFactor { cold_factor: u32 },

    #[snafu(display("failed to parse engine configuration: {source}"))]
    Parse { source: serde_json::Error },
}

/// Reasons a rule is refused at load time. Refused rules never reach the hot path.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RuleError {
    #[snafu(display("resource name is empty"))]
    EmptyResource,

    #[snafu(display("threshold must be a finite, non-negative number, got {threshold}"))]
    InvalidThreshold { threshold: f64 },

    #[snafu(display("limit_app must not be empty"))]
    EmptyLimitApp,

    #[snafu(display("strategy {strategy} requires a ref_resource"))]
    MissingRefResource { strategy: &'static str },

    #[snafu(display("warm-up period must be greater than zero seconds"))]
    InvalidWarmUpPeriod,

    #[snafu(display("cold factor must be greater than 1, got {cold_factor}"))]
    RuleColdFactor { cold_factor: u32 },

    #[snafu(display("retry timeout must be greater than zero"))]
    InvalidRetryTimeout,

    #[snafu(display("min request amount must be greater than zero"))]
    InvalidMinRequestAmount,

    #[snafu(display("ratio threshold must be within [0, 1], got {threshold}"))]
    InvalidRatio { threshold: f64 },

    #[snafu(display("invalid statistic window: {source}"))]
    InvalidWindow { source: ConfigError },
}

/// The signal handed to a caller whose call was not admitted.
///
/// It is distinct from any error the guarded call itself may produce, so callers can
/// branch into fallback logic.
#[derive(Clone, Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BlockError {
    #[snafu(display(
        "resource `{resource}` blocked by flow rule (threshold {}, {:?})",
        rule.threshold,
        rule.control_behavior
    ))]
    Flow {
        resource: String,
        rule: Arc<FlowRule>,
    },

    #[snafu(display(
        "resource `{resource}` rejected: circuit open ({:?})",
        rule.strategy
    ))]
    CircuitOpen {
        resource: String,
        rule: Arc<DegradeRule>,
    },
}

impl BlockError {
    pub fn resource(&self) -> &str {
        match self {
            BlockError::Flow { resource, .. } | BlockError::CircuitOpen { resource, .. } => {
                resource
            }
        }
    }

    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, BlockError::CircuitOpen { .. })
    }
}

/// Error returned by a guarded service: either the call was never admitted, or the
/// inner service failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GuardError<E>
where
    E: std::fmt::Debug + std::fmt::Display,
{
    #[snafu(display("{source}"))]
    Blocked { source: BlockError },

    #[snafu(display("{inner}"))]
    Inner { inner: E },
}

impl<E> GuardError<E>
where
    E: std::fmt::Debug + std::fmt::Display,
{
    pub const fn is_blocked(&self) -> bool {
        matches!(self, GuardError::Blocked { .. })
    }

    pub fn block_error(&self) -> Option<&BlockError> {
        match self {
            GuardError::Blocked { source } => Some(source),
            GuardError::Inner { .. } => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            GuardError::Inner { inner } => Some(inner),
            GuardError::Blocked { .. } => None,
        }
    }
}
