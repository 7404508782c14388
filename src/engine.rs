//! The engine ties the node tree, flow controllers and circuit breakers together
//! behind one cloneable handle.
//!
//! A call goes through [`Engine::entry`] (or [`Engine::entry_async`]):
//!
//! 1. resolve the call's [`DefaultNode`], cluster node and origin node,
//! 2. run the resource's flow controllers, then its circuit breakers,
//! 3. wait if a queueing controller asked for it,
//! 4. record the pass and hand back an [`Entry`] that records completion on drop.
//!
//! The lower-level pieces are public as well, so callers that manage their own
//! call lifecycle can drive statistics and admission directly.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use arc_swap::ArcSwap;

use crate::{
    clock::{Clock, SystemClock},
    config::EngineConfig,
    degrade::{
        BreakerState, CircuitBreaker, DegradeRule, DegradeRuleManager, StateChangeObserver,
    },
    entry::{Entry, EntryOptions, EntryType, HeldPermit},
    error::{BlockError, ConfigError},
    flow::{CallerContext, FlowController, FlowRule, FlowRuleManager, TokenResult, select_node},
    internal_event::{InternalEventHandle, QueueWaitCancelled, QueueWaited},
    node::{ClusterNode, DefaultNode, Node, NodeRegistry, StatisticNode},
    stat::MetricSnapshot,
};

/// Every node one call writes its statistics to.
#[derive(Clone, Debug)]
pub struct CallSite {
    resource: String,
    context: String,
    origin: String,
    node: Arc<DefaultNode>,
    origin_node: Option<Arc<StatisticNode>>,
    inbound: Option<Arc<ClusterNode>>,
}

impl CallSite {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn node(&self) -> &Arc<DefaultNode> {
        &self.node
    }

    pub fn origin_node(&self) -> Option<&Arc<StatisticNode>> {
        self.origin_node.as_ref()
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound.is_some()
    }

    fn each_node(&self, write: impl Fn(&dyn Node)) {
        write(&*self.node);
        if let Some(origin) = &self.origin_node {
            write(&**origin);
        }
        if let Some(inbound) = &self.inbound {
            write(&**inbound);
        }
    }
}

/// What a successful admission check still owes the caller.
#[derive(Debug, Default)]
pub(crate) struct Admission {
    wait: Option<Duration>,
    occupied: bool,
    permits: Vec<HeldPermit>,
    probes: Vec<Arc<CircuitBreaker>>,
}

impl Admission {
    fn wait_at_least(&mut self, wait: Duration) {
        self.wait = Some(self.wait.map_or(wait, |current| current.max(wait)));
    }

    fn revert_probes(&self, now: u64) {
        for breaker in &self.probes {
            breaker.revert_probe(now);
        }
    }
}

struct Inner {
    config: ArcSwap<EngineConfig>,
    clock: Arc<dyn Clock>,
    registry: NodeRegistry,
    flow: FlowRuleManager,
    degrade: DegradeRuleManager,
}

/// Handle to one engine instance. Clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &**self.inner.config.load())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = NodeRegistry::new(
            Arc::clone(&clock),
            config.window()?,
            config.statistic_max_rt_ms,
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                clock,
                registry,
                flow: FlowRuleManager::new(),
                degrade: DegradeRuleManager::new(),
            }),
        })
    }

    pub fn config(&self) -> EngineConfig {
        **self.inner.config.load()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.inner.registry
    }

    pub fn flow_rules(&self) -> &FlowRuleManager {
        &self.inner.flow
    }

    pub fn degrade_rules(&self) -> &DegradeRuleManager {
        &self.inner.degrade
    }

    /// Replaces all flow rules; returns how many were accepted.
    pub fn load_flow_rules(&self, rules: Vec<FlowRule>) -> usize {
        self.inner.flow.load_rules(rules, &self.config())
    }

    /// Replaces all degrade rules; returns how many were accepted.
    pub fn load_degrade_rules(&self, rules: Vec<DegradeRule>) -> usize {
        self.inner.degrade.load_rules(rules)
    }

    pub fn register_state_observer(
        &self,
        name: impl Into<String>,
        observer: Arc<dyn StateChangeObserver>,
    ) {
        self.inner.degrade.register_state_observer(name, observer);
    }

    /// Changes the second-level window shape. Existing statistics restart empty.
    pub fn reconfigure_window(&self, sample_count: u32, interval_ms: u64) -> Result<(), ConfigError> {
        let config = EngineConfig {
            sample_count,
            interval_ms,
            ..self.config()
        };
        config.validate()?;
        self.inner.config.store(Arc::new(config));
        self.inner.registry.reconfigure(config.window()?);
        Ok(())
    }

    pub fn resolve_node(&self, resource: &str, context: &str) -> Arc<DefaultNode> {
        self.inner.registry.resolve_node(resource, context)
    }

    pub fn resolve_call_site(&self, resource: &str, options: &EntryOptions) -> CallSite {
        self.resolve_site(resource, options, None)
    }

    fn resolve_site(
        &self,
        resource: &str,
        options: &EntryOptions,
        parent: Option<&DefaultNode>,
    ) -> CallSite {
        let registry = &self.inner.registry;
        let context = options.context_name.as_str();
        let node = match parent {
            Some(parent) => registry.resolve_child_node(resource, context, parent),
            None => registry.resolve_node(resource, context),
        };
        let origin_node = (!options.origin.is_empty())
            .then(|| node.cluster_node().get_or_create_origin_node(&options.origin));
        let inbound = (options.entry_type == EntryType::In)
            .then(|| Arc::clone(registry.inbound_node()));
        CallSite {
            resource: resource.to_owned(),
            context: options.context_name.clone(),
            origin: options.origin.clone(),
            node,
            origin_node,
            inbound,
        }
    }

    pub fn on_pass(&self, site: &CallSite, acquire: u64) {
        site.each_node(|node| node.add_pass_request(acquire));
    }

    pub fn on_block(&self, site: &CallSite, acquire: u64) {
        site.each_node(|node| node.increase_block_qps(acquire));
    }

    pub fn on_success(&self, site: &CallSite, rt: u64, acquire: u64) {
        site.each_node(|node| node.add_rt_and_success(rt, acquire));
    }

    pub fn on_exception(&self, site: &CallSite, acquire: u64) {
        site.each_node(|node| node.increase_exception_qps(acquire));
    }

    pub fn enter_concurrency(&self, site: &CallSite) {
        site.each_node(|node| node.increase_thread_num());
    }

    pub fn exit_concurrency(&self, site: &CallSite) {
        site.each_node(|node| node.decrease_thread_num());
    }

    /// Runs one flow controller against `node` at the current time.
    pub fn can_pass(
        &self,
        node: &dyn Node,
        controller: &FlowController,
        acquire: u64,
        prioritized: bool,
    ) -> TokenResult {
        controller.can_pass(node, acquire, prioritized, self.now())
    }

    /// Milliseconds until `acquire` tokens fit under `threshold` on `node`; a value
    /// equal to the configured occupy timeout means they do not fit in time.
    pub fn try_occupy_next(&self, node: &dyn Node, acquire: u64, threshold: f64) -> u64 {
        node.try_occupy_next(
            self.now(),
            acquire,
            threshold,
            self.config().occupy_timeout_ms,
        )
    }

    pub fn current_state(&self, breaker: &CircuitBreaker) -> BreakerState {
        breaker.state()
    }

    pub fn on_call_complete(&self, breaker: &CircuitBreaker, rt: u64, error: bool) {
        breaker.on_request_complete(self.now(), rt, error);
    }

    /// Completed per-second statistics of every resource and the inbound node,
    /// keyed by second. Each second is handed out once.
    pub fn collect_metrics(&self) -> BTreeMap<u64, Vec<MetricSnapshot>> {
        let registry = &self.inner.registry;
        let clusters = registry.cluster_nodes();
        let mut nodes: Vec<&Arc<ClusterNode>> = clusters.values().collect();
        nodes.push(registry.inbound_node());

        let mut by_second: BTreeMap<u64, Vec<MetricSnapshot>> = BTreeMap::new();
        for node in nodes {
            for (second, mut snapshot) in node.metrics() {
                snapshot.resource = node.name().to_owned();
                by_second.entry(second).or_default().push(snapshot);
            }
        }
        for snapshots in by_second.values_mut() {
            snapshots.sort_by(|a, b| a.resource.cmp(&b.resource));
        }
        by_second
    }

    /// Guards one call to `resource`, blocking the thread if a queueing rule asks
    /// the call to wait.
    pub fn entry(&self, resource: &str, options: &EntryOptions) -> Result<Entry, BlockError> {
        let site = self.resolve_site(resource, options, None);
        self.enter(site, options.acquire_count, options.prioritized)
    }

    /// Guards one call to `resource`, waiting asynchronously if a queueing rule
    /// asks for it. Dropping the future while it waits counts the call as blocked.
    pub async fn entry_async(
        &self,
        resource: impl Into<String>,
        options: EntryOptions,
    ) -> Result<Entry, BlockError> {
        let resource = resource.into();
        let acquire = options.acquire_count;
        let site = self.resolve_site(&resource, &options, None);
        let admission = self.check(&site, acquire, options.prioritized)?;
        let Some(wait) = admission.wait else {
            return Ok(self.admit(site, admission, acquire));
        };

        let mut pending = PendingAdmission {
            engine: self,
            acquire,
            held: Some((site, admission)),
        };
        tokio::time::sleep(wait).await;
        let (site, admission) = pending.take();
        Ok(self.admit(site, admission, acquire))
    }

    pub(crate) fn nested_entry(&self, parent: &CallSite, resource: &str) -> Result<Entry, BlockError> {
        let options = EntryOptions::builder()
            .context_name(parent.context.clone())
            .origin(parent.origin.clone())
            .build();
        let site = self.resolve_site(resource, &options, Some(&*parent.node));
        self.enter(site, options.acquire_count, options.prioritized)
    }

    fn enter(&self, site: CallSite, acquire: u64, prioritized: bool) -> Result<Entry, BlockError> {
        let admission = self.check(&site, acquire, prioritized)?;
        if let Some(wait) = admission.wait {
            self.inner.clock.sleep(wait);
        }
        Ok(self.admit(site, admission, acquire))
    }

    /// Flow rules first, then circuit breakers. A blocked call is recorded here.
    ///
    /// A prioritized call that a breaker rejects after borrowing a future pass keeps
    /// that booking; it expires with its bucket.
    fn check(&self, site: &CallSite, acquire: u64, prioritized: bool) -> Result<Admission, BlockError> {
        let now = self.now();
        let mut admission = Admission::default();

        if let Some(rules) = self.inner.flow.rules_for(&site.resource) {
            let caller = CallerContext {
                context: &site.context,
                origin: &site.origin,
                node: &site.node,
                origin_node: site.origin_node.as_ref(),
            };
            let origin_is_named = rules.names_origin(&site.origin);
            for controller in rules.controllers() {
                let Some(node) =
                    select_node(controller.rule(), &caller, &self.inner.registry, origin_is_named)
                else {
                    continue;
                };

                let result = match controller.concurrency_counter() {
                    Some(counter) => {
                        match counter.try_compare_and_increase(controller.rule().threshold as u32) {
                            Some(permit) => {
                                admission.permits.push((Arc::clone(controller), permit));
                                TokenResult::Pass
                            }
                            None => TokenResult::Blocked,
                        }
                    }
                    None => controller.can_pass(&*node, acquire, prioritized, now),
                };

                match result {
                    TokenResult::Pass => {}
                    TokenResult::Blocked => {
                        self.on_block(site, acquire);
                        controller.blocked_event().emit(acquire);
                        return Err(BlockError::Flow {
                            resource: site.resource.clone(),
                            rule: Arc::clone(controller.rule()),
                        });
                    }
                    TokenResult::Wait(wait) => admission.wait_at_least(wait),
                    // A borrowed pass settles flow control; breakers still apply.
                    TokenResult::Occupied(wait) => {
                        admission.wait_at_least(wait);
                        admission.occupied = true;
                        break;
                    }
                }
            }
        }

        if let Some(breakers) = self.inner.degrade.breakers_for(&site.resource) {
            for breaker in breakers.iter() {
                if breaker.try_pass(now) {
                    if breaker.state() == BreakerState::HalfOpen {
                        admission.probes.push(Arc::clone(breaker));
                    }
                    continue;
                }
                admission.revert_probes(now);
                self.on_block(site, acquire);
                breaker.rejected_event().emit(breaker.state());
                return Err(BlockError::CircuitOpen {
                    resource: site.resource.clone(),
                    rule: Arc::clone(breaker.rule()),
                });
            }
        }

        Ok(admission)
    }

    fn admit(&self, site: CallSite, admission: Admission, acquire: u64) -> Entry {
        if let Some(wait) = admission.wait {
            emit!(QueueWaited {
                resource: &site.resource,
                wait,
                prioritized: admission.occupied,
            });
        }
        // Borrowed passes were booked when the slot was occupied.
        if !admission.occupied {
            self.on_pass(&site, acquire);
        }
        self.enter_concurrency(&site);
        Entry::new(self.clone(), site, acquire, self.now(), admission.permits)
    }
}

/// Holds an admitted call while it waits. If the wait never finishes the call is
/// counted as blocked.
struct PendingAdmission<'a> {
    engine: &'a Engine,
    acquire: u64,
    held: Option<(CallSite, Admission)>,
}

impl PendingAdmission<'_> {
    fn take(&mut self) -> (CallSite, Admission) {
        match self.held.take() {
            Some(held) => held,
            None => unreachable!("pending admission taken twice"),
        }
    }
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if let Some((site, admission)) = self.held.take() {
            admission.revert_probes(self.engine.now());
            self.engine.on_block(&site, self.acquire);
            emit!(QueueWaitCancelled {
                resource: &site.resource,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        degrade::DegradeStrategy,
        flow::{ControlBehavior, Grade, Strategy},
        node::DEFAULT_CONTEXT_NAME,
    };

    fn engine() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = Engine::with_clock(
            EngineConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        (engine, clock)
    }

    fn qps(resource: &str, threshold: f64) -> FlowRule {
        FlowRule::builder()
            .resource(resource)
            .threshold(threshold)
            .build()
    }

    #[test]
    fn passes_and_blocks_are_recorded_on_every_node() {
        let (engine, _clock) = engine();
        engine.load_flow_rules(vec![qps("api", 2.0)]);
        let options = EntryOptions::builder()
            .origin("web")
            .entry_type(EntryType::In)
            .build();

        let a = engine.entry("api", &options).unwrap();
        let b = engine.entry("api", &options).unwrap();
        let blocked = engine.entry("api", &options).unwrap_err();
        assert!(!blocked.is_circuit_open());
        assert_eq!(blocked.resource(), "api");

        let cluster = engine.registry().cluster_node("api").unwrap();
        assert_eq!(cluster.pass_qps(), 2.0);
        assert_eq!(cluster.block_qps(), 1.0);
        assert_eq!(cluster.cur_thread_num(), 2);
        assert_eq!(cluster.origin_node("web").unwrap().pass_qps(), 2.0);
        assert_eq!(engine.registry().inbound_node().pass_qps(), 2.0);
        assert_eq!(a.node().pass_qps(), 2.0);

        drop(a);
        b.exit();
        assert_eq!(cluster.cur_thread_num(), 0);
        assert_eq!(cluster.success_qps(), 2.0);
    }

    #[test]
    fn errors_are_recorded_once_and_feed_breakers() {
        let (engine, _clock) = engine();
        engine.load_degrade_rules(vec![
            DegradeRule::builder()
                .resource("db")
                .strategy(DegradeStrategy::ErrorCount)
                .threshold(1.0)
                .min_request_amount(1)
                .build(),
        ]);

        let mut entry = engine.entry("db", &EntryOptions::default()).unwrap();
        entry.set_error();
        entry.set_error();
        drop(entry);

        let cluster = engine.registry().cluster_node("db").unwrap();
        assert_eq!(cluster.exception_qps(), 1.0);
        let err = engine.entry("db", &EntryOptions::default()).unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(cluster.block_qps(), 1.0);
    }

    #[test]
    fn concurrency_rules_hold_a_permit_per_entry() {
        let (engine, _clock) = engine();
        engine.load_flow_rules(vec![
            FlowRule::builder()
                .resource("pool")
                .threshold(2.0)
                .grade(Grade::Concurrency)
                .build(),
        ]);
        let options = EntryOptions::default();
        let first = engine.entry("pool", &options).unwrap();
        let _second = engine.entry("pool", &options).unwrap();
        assert!(engine.entry("pool", &options).is_err());
        drop(first);
        assert!(engine.entry("pool", &options).is_ok());
    }

    #[test]
    fn blocking_entry_sleeps_through_the_clock() {
        let (engine, clock) = engine();
        engine.load_flow_rules(vec![
            FlowRule::builder()
                .resource("paced")
                .threshold(10.0)
                .control_behavior(ControlBehavior::RateLimiter)
                .build(),
        ]);
        let options = EntryOptions::default();
        let start = clock.now_ms();
        drop(engine.entry("paced", &options).unwrap());
        drop(engine.entry("paced", &options).unwrap());
        // The second call waited 100ms on the manual clock.
        assert_eq!(clock.now_ms(), start + 100);
    }

    #[test]
    fn prioritized_entry_borrows_without_double_counting() {
        let (engine, clock) = engine();
        engine.load_flow_rules(vec![qps("hot", 5.0)]);
        let normal = EntryOptions::default();
        for _ in 0..5 {
            drop(engine.entry("hot", &normal).unwrap());
        }
        assert!(engine.entry("hot", &normal).is_err());

        clock.set(1_000_700);
        let prioritized = EntryOptions::builder().prioritized(true).build();
        let entry = engine.entry("hot", &prioritized).unwrap();
        // Slept 300ms into the next bucket, which the borrowed pass seeded.
        assert_eq!(clock.now_ms(), 1_001_000);
        let cluster = engine.registry().cluster_node("hot").unwrap();
        assert_eq!(cluster.pass_qps(), 1.0);
        assert_eq!(cluster.occupied_pass_qps(), 0.0);
        assert_eq!(cluster.cur_thread_num(), 1);
        drop(entry);
    }

    #[test]
    fn prioritized_entry_is_still_rejected_by_an_open_breaker() {
        let (engine, clock) = engine();
        engine.load_flow_rules(vec![qps("r", 1.0)]);
        engine.load_degrade_rules(vec![
            DegradeRule::builder()
                .resource("r")
                .strategy(DegradeStrategy::ErrorCount)
                .threshold(1.0)
                .retry_timeout_ms(10_000)
                .build(),
        ]);
        let mut failed = engine.entry("r", &EntryOptions::default()).unwrap();
        failed.set_error();
        drop(failed);
        let breakers = engine.degrade_rules().breakers_for("r").unwrap();
        assert_eq!(engine.current_state(&breakers[0]), BreakerState::Open);

        clock.set(1_000_700);
        let prioritized = EntryOptions::builder().prioritized(true).build();
        let err = engine.entry("r", &prioritized).unwrap_err();
        assert!(err.is_circuit_open());
        // Rejected before any wait.
        assert_eq!(clock.now_ms(), 1_000_700);
        let cluster = engine.registry().cluster_node("r").unwrap();
        assert_eq!(cluster.block_qps(), 1.0);
        assert_eq!(cluster.cur_thread_num(), 0);
    }

    #[test]
    fn related_concurrency_rule_reads_the_referenced_resource() {
        let (engine, _clock) = engine();
        engine.load_flow_rules(vec![
            FlowRule::builder()
                .resource("a")
                .threshold(1.0)
                .grade(Grade::Concurrency)
                .strategy(Strategy::Relate)
                .ref_resource("b")
                .build(),
        ]);
        let options = EntryOptions::default();
        let held: Vec<_> = (0..3)
            .map(|_| engine.entry("b", &options).unwrap())
            .collect();
        assert_eq!(engine.registry().cluster_node("b").unwrap().cur_thread_num(), 3);

        let err = engine.entry("a", &options).unwrap_err();
        assert!(!err.is_circuit_open());

        drop(held);
        assert!(engine.entry("a", &options).is_ok());
    }

    #[test]
    fn identical_concurrency_rules_admit_the_same_after_reload() {
        let (engine, _clock) = engine();
        let rules = || {
            let rule = FlowRule::builder()
                .resource("pool")
                .threshold(2.0)
                .grade(Grade::Concurrency)
                .build();
            vec![rule.clone(), rule]
        };
        let options = EntryOptions::default();
        let admitted = |engine: &Engine| {
            let held: Vec<_> = (0..3)
                .filter_map(|_| engine.entry("pool", &options).ok())
                .collect();
            held.len()
        };

        engine.load_flow_rules(rules());
        assert_eq!(admitted(&engine), 2);
        engine.load_flow_rules(rules());
        assert_eq!(admitted(&engine), 2);
    }

    #[test]
    fn nested_entries_share_the_context() {
        let (engine, _clock) = engine();
        let options = EntryOptions::builder().context_name("checkout").build();
        let outer = engine.entry("outer", &options).unwrap();
        let inner = outer.nested("inner").unwrap();
        assert_eq!(inner.context(), "checkout");
        assert_eq!(outer.node().children().len(), 1);
        assert!(Arc::ptr_eq(&outer.node().children()[0], inner.node()));
        assert_eq!(engine.registry().entrance_node("checkout").pass_qps(), 1.0);
    }

    #[test]
    fn blocked_probe_reverts_to_open() {
        let (engine, clock) = engine();
        let rule = |threshold| {
            DegradeRule::builder()
                .resource("svc")
                .strategy(DegradeStrategy::ErrorCount)
                .threshold(threshold)
                .min_request_amount(1)
                .retry_timeout_ms(1_000)
                .build()
        };
        engine.load_degrade_rules(vec![rule(1.0), rule(2.0)]);
        let breakers = engine.degrade_rules().breakers_for("svc").unwrap();

        // Open only the first breaker, then open the second one separately so its
        // retry time lies further out.
        breakers[0].on_request_complete(clock.now_ms(), 1, true);
        clock.advance(500);
        breakers[1].on_request_complete(clock.now_ms(), 1, true);
        breakers[1].on_request_complete(clock.now_ms(), 1, true);
        assert_eq!(breakers[0].state(), BreakerState::Open);
        assert_eq!(breakers[1].state(), BreakerState::Open);

        clock.advance(600);
        let err = engine.entry("svc", &EntryOptions::default()).unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(breakers[0].state(), BreakerState::Open);
        assert_eq!(breakers[0].next_retry_ms(), clock.now_ms() + 1_000);
    }

    #[test]
    fn window_reconfiguration_is_validated() {
        let (engine, _clock) = engine();
        assert!(engine.reconfigure_window(3, 1000).is_err());
        engine.reconfigure_window(4, 1000).unwrap();
        assert_eq!(engine.config().sample_count, 4);
        assert_eq!(
            engine.resolve_node("x", DEFAULT_CONTEXT_NAME).statistic().window().sample_count(),
            4
        );
    }

    #[test]
    fn metrics_are_collected_per_second() {
        let (engine, clock) = engine();
        let options = EntryOptions::builder().entry_type(EntryType::In).build();
        drop(engine.entry("a", &options).unwrap());
        drop(engine.entry("b", &EntryOptions::default()).unwrap());
        clock.advance(1_000);

        let metrics = engine.collect_metrics();
        let second = &metrics[&1_000_000];
        let names: Vec<_> = second.iter().map(|s| s.resource.as_str()).collect();
        assert_eq!(names, vec!["__total_inbound_traffic__", "a", "b"]);
        assert!(second.iter().all(|s| s.pass == 1 && s.success == 1));
        assert!(engine.collect_metrics().is_empty());
    }
}
