use std::sync::Arc;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    concurrency::ConcurrencyPermit,
    engine::{CallSite, Engine},
    error::BlockError,
    flow::FlowController,
    node::{DEFAULT_CONTEXT_NAME, DefaultNode},
};

/// Direction of the traffic an entry represents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Traffic arriving at this process; also counted on the inbound node.
    In,
    #[default]
    Out,
}

/// Per-call options for [`Engine::entry`].
///
/// | Option | Default | Description |
/// |--------|---------|-------------|
/// | `context_name` | `flowguard_default_context` | Call-chain the entry belongs to |
/// | `origin` | empty | Caller identity used by origin-specific rules |
/// | `acquire_count` | 1 | Tokens the call consumes |
/// | `entry_type` | `out` | `in` also counts the call on the inbound node |
/// | `prioritized` | false | Over a QPS threshold, borrow from an upcoming bucket instead of failing |
///
/// ```rust
/// use flowguard::entry::{EntryOptions, EntryType};
///
/// let options = EntryOptions::builder()
///     .context_name("checkout")
///     .origin("web")
///     .entry_type(EntryType::In)
///     .build();
/// assert_eq!(options.acquire_count, 1);
/// ```
#[derive(Clone, Debug, Builder)]
pub struct EntryOptions {
    #[builder(into, default = DEFAULT_CONTEXT_NAME.to_owned())]
    pub context_name: String,

    #[builder(into, default)]
    pub origin: String,

    #[builder(default = 1)]
    pub acquire_count: u64,

    #[builder(default)]
    pub entry_type: EntryType,

    #[builder(default)]
    pub prioritized: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A concurrency slot together with the controller whose counter issued it.
pub(crate) type HeldPermit = (Arc<FlowController>, ConcurrencyPermit);

/// An admitted call.
///
/// Dropping the entry (or calling [`exit`](Self::exit)) records the call's
/// completion: response time and success on every node it touched, the in-flight
/// count going back down, and the outcome fed to the resource's circuit breakers.
#[must_use = "dropping an entry immediately records the call as finished"]
#[derive(Debug)]
pub struct Entry {
    engine: Engine,
    site: CallSite,
    acquire: u64,
    created_at: u64,
    permits: Vec<HeldPermit>,
    error: bool,
}

impl Entry {
    pub(crate) fn new(
        engine: Engine,
        site: CallSite,
        acquire: u64,
        created_at: u64,
        permits: Vec<HeldPermit>,
    ) -> Self {
        Self {
            engine,
            site,
            acquire,
            created_at,
            permits,
            error: false,
        }
    }

    pub fn resource(&self) -> &str {
        self.site.resource()
    }

    pub fn context(&self) -> &str {
        self.site.context()
    }

    pub fn node(&self) -> &Arc<DefaultNode> {
        self.site.node()
    }

    pub fn call_site(&self) -> &CallSite {
        &self.site
    }

    /// Marks the guarded call as failed. The exception is counted once, however
    /// often this is called.
    pub fn set_error(&mut self) {
        if self.error {
            return;
        }
        self.error = true;
        self.engine.on_exception(&self.site, self.acquire);
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Enters `resource` as a call made from within this one, in the same context.
    pub fn nested(&self, resource: &str) -> Result<Entry, BlockError> {
        self.engine.nested_entry(&self.site, resource)
    }

    pub fn exit(self) {}
}

impl Drop for Entry {
    fn drop(&mut self) {
        let now = self.engine.now();
        let rt = now.saturating_sub(self.created_at);

        self.engine.on_success(&self.site, rt, self.acquire);
        self.engine.exit_concurrency(&self.site);

        if let Some(breakers) = self.engine.degrade_rules().breakers_for(self.site.resource()) {
            for breaker in breakers.iter() {
                breaker.on_request_complete(now, rt, self.error);
            }
        }

        for (controller, permit) in self.permits.drain(..) {
            if let Some(counter) = controller.concurrency_counter() {
                counter.try_decrease(permit);
            }
        }
    }
}
