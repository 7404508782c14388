//! Flow control: per-call admission against a rate or concurrency threshold.
//!
//! A [`FlowRule`] is compiled into a [`FlowController`] when it is loaded. The
//! controller owns whatever state its shaping behavior needs (stored warm-up tokens,
//! the pacing timestamp, a concurrency counter) and answers [`TokenResult`]s.

mod checker;
mod default_controller;
mod manager;
mod throttling;
mod warm_up;
mod warm_up_throttling;

use std::{sync::Arc, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

pub use checker::{CallerContext, select_node};
pub use default_controller::DefaultController;
pub use manager::{FlowRuleManager, ResourceFlowRules};
pub use throttling::ThrottlingController;
pub use warm_up::WarmUpController;
pub use warm_up_throttling::WarmUpThrottlingController;

use crate::{
    concurrency::ConcurrencyCounter,
    config::{EngineConfig, WindowSpec},
    error::{
        EmptyLimitAppSnafu, EmptyResourceSnafu, InvalidThresholdSnafu, InvalidWarmUpPeriodSnafu,
        InvalidWindowSnafu, MissingRefResourceSnafu, RuleColdFactorSnafu, RuleError,
    },
    internal_event::FlowBlocked,
    node::Node,
};

/// `limit_app` value matching every caller.
pub const LIMIT_APP_DEFAULT: &str = "default";

/// `limit_app` value matching callers no other rule on the resource names.
pub const LIMIT_APP_OTHER: &str = "other";

/// What the threshold limits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    /// Passes per second.
    #[default]
    Qps,
    /// Calls in flight.
    Concurrency,
}

/// How calls over the threshold are shaped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBehavior {
    #[default]
    Direct,
    WarmUp,
    RateLimiter,
    WarmUpRateLimiter,
}

impl ControlBehavior {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ControlBehavior::Direct => "direct",
            ControlBehavior::WarmUp => "warm_up",
            ControlBehavior::RateLimiter => "rate_limiter",
            ControlBehavior::WarmUpRateLimiter => "warm_up_rate_limiter",
        }
    }
}

/// Which node's statistics the rule is checked against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The resource's own statistics.
    #[default]
    Direct,
    /// The cluster statistics of `ref_resource`.
    Relate,
    /// The resource's statistics within the context named by `ref_resource`.
    Chain,
}

impl Strategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Relate => "relate",
            Strategy::Chain => "chain",
        }
    }
}

/// A flow rule as loaded from configuration.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `resource` | required | Resource the rule guards |
/// | `threshold` | required | Allowed QPS or in-flight calls; `0` blocks everything |
/// | `grade` | `qps` | `qps` or `concurrency` |
/// | `control_behavior` | `direct` | `direct`, `warm_up`, `rate_limiter` or `warm_up_rate_limiter` |
/// | `limit_app` | `"default"` | Caller origin the rule applies to, `"default"` or `"other"` |
/// | `strategy` | `direct` | `direct`, `relate` or `chain` |
/// | `ref_resource` | none | Related resource (`relate`) or entry context (`chain`) |
/// | `warm_up_period_sec` | 10 | Time to ramp from cold to `threshold` |
/// | `cold_factor` | engine default | Cold rate is `threshold / cold_factor` |
/// | `max_queueing_time_ms` | 500 | Longest a rate-limited call may wait |
/// | `stat_interval_ms` | 1000 | Period the rate-limiter threshold is counted over |
///
/// # Example
///
/// ```rust
/// use flowguard::flow::{ControlBehavior, FlowRule};
///
/// let rule = FlowRule::builder()
///     .resource("orders")
///     .threshold(10.0)
///     .control_behavior(ControlBehavior::RateLimiter)
///     .build();
/// assert!(rule.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowRule {
    #[builder(into)]
    pub resource: String,

    pub threshold: f64,

    #[serde(default)]
    #[builder(default)]
    pub grade: Grade,

    #[serde(default)]
    #[builder(default)]
    pub control_behavior: ControlBehavior,

    #[serde(default = "default_limit_app")]
    #[builder(into, default = default_limit_app())]
    pub limit_app: String,

    #[serde(default)]
    #[builder(default)]
    pub strategy: Strategy,

    #[serde(default)]
    #[builder(into)]
    pub ref_resource: Option<String>,

    #[serde(default = "default_warm_up_period_sec")]
    #[builder(default = default_warm_up_period_sec())]
    pub warm_up_period_sec: u32,

    #[serde(default)]
    pub cold_factor: Option<u32>,

    #[serde(default = "default_max_queueing_time_ms")]
    #[builder(default = default_max_queueing_time_ms())]
    pub max_queueing_time_ms: u64,

    #[serde(default = "default_stat_interval_ms")]
    #[builder(default = default_stat_interval_ms())]
    pub stat_interval_ms: u64,
}

fn default_limit_app() -> String {
    LIMIT_APP_DEFAULT.to_owned()
}

const fn default_warm_up_period_sec() -> u32 {
    10
}

const fn default_max_queueing_time_ms() -> u64 {
    500
}

const fn default_stat_interval_ms() -> u64 {
    1000
}

impl FlowRule {
    pub fn validate(&self) -> Result<(), RuleError> {
        ensure!(!self.resource.is_empty(), EmptyResourceSnafu);
        ensure!(
            self.threshold.is_finite() && self.threshold >= 0.0,
            InvalidThresholdSnafu {
                threshold: self.threshold
            }
        );
        ensure!(!self.limit_app.is_empty(), EmptyLimitAppSnafu);
        if self.strategy != Strategy::Direct {
            ensure!(
                self.ref_resource.as_deref().is_some_and(|r| !r.is_empty()),
                MissingRefResourceSnafu {
                    strategy: self.strategy.as_str()
                }
            );
        }
        if matches!(
            self.control_behavior,
            ControlBehavior::WarmUp | ControlBehavior::WarmUpRateLimiter
        ) {
            ensure!(self.warm_up_period_sec > 0, InvalidWarmUpPeriodSnafu);
            if let Some(cold_factor) = self.cold_factor {
                ensure!(cold_factor > 1, RuleColdFactorSnafu { cold_factor });
            }
        }
        if matches!(
            self.control_behavior,
            ControlBehavior::RateLimiter | ControlBehavior::WarmUpRateLimiter
        ) {
            WindowSpec::new(1, self.stat_interval_ms).context(InvalidWindowSnafu)?;
        }
        Ok(())
    }

    pub(crate) fn is_specific_origin(&self) -> bool {
        self.limit_app != LIMIT_APP_DEFAULT && self.limit_app != LIMIT_APP_OTHER
    }
}

/// Outcome of one admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenResult {
    Pass,
    Blocked,
    /// Admit after waiting; the pass is recorded once the wait is over.
    Wait(Duration),
    /// Admit after waiting on a pass borrowed from an upcoming bucket. The pass is
    /// already booked, so it must not be recorded again.
    Occupied(Duration),
}

impl TokenResult {
    pub const fn is_blocked(&self) -> bool {
        matches!(self, TokenResult::Blocked)
    }

    pub(crate) fn wait_ms(ms: u64) -> Self {
        if ms == 0 {
            TokenResult::Pass
        } else {
            TokenResult::Wait(Duration::from_millis(ms))
        }
    }
}

#[derive(Debug)]
enum Shaper {
    Direct(DefaultController),
    WarmUp(WarmUpController),
    RateLimiter(ThrottlingController),
    WarmUpRateLimiter(WarmUpThrottlingController),
}

/// A loaded flow rule together with its shaping state.
#[derive(Debug)]
pub struct FlowController {
    rule: Arc<FlowRule>,
    shaper: Shaper,
    counter: Option<ConcurrencyCounter>,
    blocked: FlowBlocked,
}

impl FlowController {
    /// Compiles a validated rule. Engine-wide defaults fill in what the rule leaves
    /// unset.
    pub fn new(rule: FlowRule, config: &EngineConfig) -> Result<Self, RuleError> {
        rule.validate()?;
        let cold_factor = rule.cold_factor.unwrap_or(config.cold_factor);
        let shaper = match rule.control_behavior {
            ControlBehavior::Direct => Shaper::Direct(DefaultController::new(
                rule.grade,
                rule.threshold,
                config.occupy_timeout_ms,
            )),
            ControlBehavior::WarmUp => Shaper::WarmUp(WarmUpController::new(
                rule.threshold,
                rule.warm_up_period_sec,
                cold_factor,
            )),
            ControlBehavior::RateLimiter => Shaper::RateLimiter(ThrottlingController::new(
                rule.threshold,
                rule.max_queueing_time_ms,
                rule.stat_interval_ms,
            )),
            ControlBehavior::WarmUpRateLimiter => {
                Shaper::WarmUpRateLimiter(WarmUpThrottlingController::new(
                    rule.threshold,
                    rule.warm_up_period_sec,
                    cold_factor,
                    rule.max_queueing_time_ms,
                    rule.stat_interval_ms,
                ))
            }
        };
        // A related resource's in-flight calls are read from its node instead.
        let counter = (rule.grade == Grade::Concurrency
            && rule.control_behavior == ControlBehavior::Direct
            && rule.strategy != Strategy::Relate)
            .then(ConcurrencyCounter::new);
        let blocked = FlowBlocked::register(
            rule.resource.clone(),
            rule.limit_app.clone(),
            rule.control_behavior,
            rule.threshold,
        );
        Ok(Self {
            rule: Arc::new(rule),
            shaper,
            counter,
            blocked,
        })
    }

    pub fn rule(&self) -> &Arc<FlowRule> {
        &self.rule
    }

    /// The strict in-flight counter used for concurrency-grade direct rules that
    /// limit the guarded resource itself.
    pub fn concurrency_counter(&self) -> Option<&ConcurrencyCounter> {
        self.counter.as_ref()
    }

    /// Records a call this rule blocked.
    pub(crate) fn blocked_event(&self) -> &FlowBlocked {
        &self.blocked
    }

    pub fn can_pass(&self, node: &dyn Node, acquire: u64, prioritized: bool, now: u64) -> TokenResult {
        match &self.shaper {
            Shaper::Direct(c) => c.can_pass(node, acquire, prioritized, now),
            Shaper::WarmUp(c) => c.can_pass(node, acquire, now),
            Shaper::RateLimiter(c) => c.can_pass(acquire, now),
            Shaper::WarmUpRateLimiter(c) => c.can_pass(node, acquire, now),
        }
    }
}
