use metrics::{Counter, counter};

use super::InternalEvent;
use crate::{degrade::BreakerState, registered_event};

#[derive(Debug)]
pub struct CircuitBreakerTransitioned<'a> {
    pub resource: &'a str,
    pub from: BreakerState,
    pub to: BreakerState,
    pub snapshot: Option<f64>,
}

impl InternalEvent for CircuitBreakerTransitioned<'_> {
    fn emit(self) {
        info!(
            message = "Circuit breaker state changed.",
            resource = self.resource,
            from = self.from.as_str(),
            to = self.to.as_str(),
            snapshot = ?self.snapshot,
        );
        counter!(
            "flowguard_circuit_breaker_transitions_total",
            "resource" => self.resource.to_owned(),
            "to" => self.to.as_str(),
        )
        .increment(1);
    }
}

registered_event! {
    CircuitOpenRejected {
        resource: String,
    } => {
        rejected: Counter = counter!(
            "flowguard_circuit_open_rejected_total",
            "resource" => resource.clone()
        ),
    }

    fn emit(&self, state: BreakerState) {
        debug!(
            message = "Call rejected by circuit breaker.",
            resource = %self.resource,
            state = state.as_str(),
        );
        self.rejected.increment(1);
    }
}

#[derive(Debug)]
pub struct StateObserverPanicked<'a> {
    pub observer: &'a str,
    pub resource: &'a str,
}

impl InternalEvent for StateObserverPanicked<'_> {
    fn emit(self) {
        error!(
            message = "Circuit breaker state observer panicked; ignoring.",
            observer = self.observer,
            resource = self.resource,
        );
        counter!("flowguard_state_observer_panics_total").increment(1);
    }
}
