use std::time::Duration;

use metrics::{Counter, counter, histogram};

use super::InternalEvent;
use crate::{flow::ControlBehavior, registered_event};

registered_event! {
    FlowBlocked {
        resource: String,
        limit_app: String,
        behavior: ControlBehavior,
        threshold: f64,
    } => {
        blocked: Counter = counter!(
            "flowguard_flow_blocked_total",
            "resource" => resource.clone(),
            "behavior" => behavior.as_str()
        ),
    }

    fn emit(&self, acquire: u64) {
        debug!(
            message = "Call blocked by flow rule.",
            resource = %self.resource,
            limit_app = %self.limit_app,
            behavior = ?self.behavior,
            threshold = self.threshold,
            acquire,
        );
        self.blocked.increment(1);
    }
}

#[derive(Debug)]
pub struct QueueWaited<'a> {
    pub resource: &'a str,
    pub wait: Duration,
    pub prioritized: bool,
}

impl InternalEvent for QueueWaited<'_> {
    fn emit(self) {
        trace!(
            message = "Call admitted after waiting.",
            resource = self.resource,
            wait_ms = self.wait.as_millis() as u64,
            prioritized = self.prioritized,
        );
        histogram!(
            "flowguard_queue_wait_seconds",
            "resource" => self.resource.to_owned(),
        )
        .record(self.wait);
    }
}

#[derive(Debug)]
pub struct QueueWaitCancelled<'a> {
    pub resource: &'a str,
}

impl InternalEvent for QueueWaitCancelled<'_> {
    fn emit(self) {
        debug!(
            message = "Queued call cancelled before admission; counted as blocked.",
            resource = self.resource,
        );
        counter!(
            "flowguard_queue_cancelled_total",
            "resource" => self.resource.to_owned(),
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct RulesLoaded {
    pub kind: &'static str,
    pub accepted: usize,
    pub rejected: usize,
}

impl InternalEvent for RulesLoaded {
    fn emit(self) {
        info!(
            message = "Rules loaded.",
            kind = self.kind,
            accepted = self.accepted,
            rejected = self.rejected,
        );
        counter!("flowguard_rule_loads_total", "kind" => self.kind).increment(1);
    }
}

#[derive(Debug)]
pub struct RuleRejected<'a, E: std::fmt::Display> {
    pub kind: &'static str,
    pub resource: &'a str,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for RuleRejected<'_, E> {
    fn emit(self) {
        warn!(
            message = "Ignoring invalid rule.",
            kind = self.kind,
            resource = self.resource,
            error = %self.error,
        );
        counter!("flowguard_rules_rejected_total", "kind" => self.kind).increment(1);
    }
}
