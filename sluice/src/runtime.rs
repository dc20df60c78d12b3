use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::authority::{AuthorityRule, AuthorityRuleManager};
use crate::clock::Clock;
use crate::cluster::TokenService;
use crate::config::Config;
use crate::context::{Context, ContextStore, EntryFrame, DEFAULT_CONTEXT_NAME};
use crate::degrade::{DegradeRule, DegradeRuleManager};
use crate::entry::Entry;
use crate::error::{BlockError, RuleError};
use crate::flow::{FlowRule, FlowRuleManager};
use crate::metric_log::MetricWriter;
use crate::node::{ClusterNode, DefaultNode, NodeKind};
use crate::param::ParamValue;
use crate::param_flow::{ParamFlowRule, ParamFlowRuleManager, ParameterMetric};
use crate::resource::{Resource, TrafficType};
use crate::slots::{self, Decision, Departure, Flight, Slot};
use crate::system::{NoopProbe, SystemProbe, SystemRule, SystemRuleManager};
use crate::timer::Timer;

static RUNTIME_SEQ: AtomicU64 = AtomicU64::new(1);

/// Name of the synthetic entrance node above all context entrances.
const ROOT_NODE_NAME: &str = "machine-root";

/// Everything one runtime owns. Shared by the handle, live entries and the
/// timer tasks.
pub(crate) struct Shared {
    pub id: u64,
    pub config: Config,
    pub clock: Clock,
    pub root: Arc<DefaultNode>,
    pub entrances: DashMap<Arc<str>, Arc<DefaultNode>>,
    pub cluster_nodes: DashMap<Arc<str>, Arc<ClusterNode>>,
    pub node_cache: DashMap<(Arc<str>, Arc<str>), Arc<DefaultNode>>,
    /// Process-wide aggregate of all inbound traffic, consulted by the
    /// system protection rules.
    pub inbound: Arc<ClusterNode>,
    pub flow_rules: FlowRuleManager,
    pub degrade_rules: DegradeRuleManager,
    pub authority_rules: AuthorityRuleManager,
    pub system_rules: SystemRuleManager,
    pub param_rules: ParamFlowRuleManager,
    pub param_metrics: DashMap<Arc<str>, Arc<ParameterMetric>>,
    pub token_service: RwLock<Option<Arc<dyn TokenService>>>,
    pub probe: RwLock<Arc<dyn SystemProbe>>,
    pub timer: Timer,
    pub chain: Vec<Box<dyn Slot>>,
    entry_seq: AtomicU64,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("resources", &self.cluster_nodes.len())
            .finish()
    }
}

impl Shared {
    pub fn param_metric_for(&self, resource: &Arc<str>) -> Arc<ParameterMetric> {
        self.param_metrics
            .entry(Arc::clone(resource))
            .or_insert_with(|| {
                Arc::new(ParameterMetric::new(
                    self.config.sample_count,
                    self.config.interval_ms,
                    self.clock.clone(),
                ))
            })
            .clone()
    }
}

/// Options for one acquisition.
#[derive(Debug, Clone)]
pub struct EntryArgs {
    resource: String,
    traffic: TrafficType,
    batch: u32,
    prioritized: bool,
    args: Vec<ParamValue>,
    origin: Option<String>,
}

impl EntryArgs {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            traffic: TrafficType::Outbound,
            batch: 1,
            prioritized: false,
            args: Vec::new(),
            origin: None,
        }
    }

    pub fn with_traffic(mut self, traffic: TrafficType) -> Self {
        self.traffic = traffic;
        self
    }

    pub fn with_batch(mut self, batch: u32) -> Self {
        self.batch = batch;
        self
    }

    /// Prioritized QPS acquisitions may borrow capacity from an upcoming
    /// window instead of being rejected.
    pub fn with_priority(mut self, prioritized: bool) -> Self {
        self.prioritized = prioritized;
        self
    }

    pub fn with_args(mut self, args: Vec<ParamValue>) -> Self {
        self.args = args;
        self
    }

    /// Calling origin to attribute this acquisition to. An already-installed
    /// context keeps its own origin; this one applies to implicitly created
    /// contexts and to detached entries.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// The traffic-governance runtime: node registries, rule managers and the
/// admission pipeline behind one cloneable handle.
///
/// Runtimes are self-contained; tests construct a fresh one each and never
/// observe each other's nodes, rules or thread-local contexts.
#[derive(Debug, Clone)]
pub struct Sluice {
    shared: Arc<Shared>,
}

impl Default for Sluice {
    fn default() -> Self {
        Self::new()
    }
}

impl Sluice {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Runtime on an explicit clock; pair with [`Clock::mock`] for
    /// deterministic window tests.
    pub fn with_clock(config: Config, clock: Clock) -> Self {
        let config = config.normalized();
        let root = Arc::new(DefaultNode::new(
            Resource::inbound(ROOT_NODE_NAME),
            NodeKind::Entrance,
            clock.clone(),
            config.sample_count,
            config.interval_ms,
        ));
        let inbound = Arc::new(ClusterNode::new(
            clock.clone(),
            config.sample_count,
            config.interval_ms,
        ));

        let metric_log_path = config.metric_log_path.clone();
        let flush_interval = config.metric_flush_interval_ms;

        let shared = Arc::new(Shared {
            id: RUNTIME_SEQ.fetch_add(1, Ordering::Relaxed),
            config,
            clock: clock.clone(),
            root,
            entrances: DashMap::new(),
            cluster_nodes: DashMap::new(),
            node_cache: DashMap::new(),
            inbound,
            flow_rules: FlowRuleManager::default(),
            degrade_rules: DegradeRuleManager::default(),
            authority_rules: AuthorityRuleManager::default(),
            system_rules: SystemRuleManager::default(),
            param_rules: ParamFlowRuleManager::default(),
            param_metrics: DashMap::new(),
            token_service: RwLock::new(None),
            probe: RwLock::new(Arc::new(NoopProbe)),
            timer: Timer::new(),
            chain: slots::build_chain(),
            entry_seq: AtomicU64::new(1),
        });

        if let Some(path) = metric_log_path {
            let mut writer = MetricWriter::new(path, &clock);
            let weak = Arc::downgrade(&shared);
            shared.timer.schedule_every(
                Duration::from_millis(flush_interval.max(100)),
                move || {
                    if let Some(shared) = weak.upgrade() {
                        writer.flush(&shared);
                    }
                },
            );
        }

        Self { shared }
    }

    fn store(&self) -> ContextStore {
        ContextStore::new(self.shared.id)
    }

    /// Entrance node for `context_name`, attached under the root on first
    /// use. The same name yields the same node process-wide.
    fn entrance_node(&self, context_name: &str) -> Arc<DefaultNode> {
        let shared = &self.shared;
        match shared.entrances.get(context_name) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let node = shared
                    .entrances
                    .entry(Arc::from(context_name))
                    .or_insert_with(|| {
                        Arc::new(DefaultNode::new(
                            Resource::inbound(context_name),
                            NodeKind::Entrance,
                            shared.clock.clone(),
                            shared.config.sample_count,
                            shared.config.interval_ms,
                        ))
                    })
                    .clone();
                shared.root.add_child(Arc::clone(&node));
                node
            }
        }
    }

    fn new_context(&self, context_name: &str, origin: Option<&str>) -> Context {
        Context::new(
            Arc::from(context_name),
            origin.filter(|o| !o.is_empty()).map(Arc::from),
            self.entrance_node(context_name),
        )
    }

    /// Installs a named context on the calling thread if it has none yet.
    /// The context stays until [`Sluice::exit_context`] after its outermost
    /// entry has exited.
    pub fn enter_context(&self, context_name: &str, origin: Option<&str>) {
        let store = self.store();
        store.install_if_absent(|| self.new_context(context_name, origin));
    }

    /// Releases the calling thread's context, unless entries are still live.
    pub fn exit_context(&self) {
        let store = self.store();
        let releasable = store.with(|ctx| ctx.map(|c| c.stack.is_empty()).unwrap_or(false));
        if releasable {
            store.clear();
        }
    }

    /// Acquires one permit on an outbound resource.
    pub fn entry(&self, resource: &str) -> Result<Entry, BlockError> {
        self.entry_with(EntryArgs::new(resource))
    }

    /// Acquires with explicit traffic direction, batch size, priority and
    /// hot-parameter arguments.
    pub fn entry_with(&self, opts: EntryArgs) -> Result<Entry, BlockError> {
        self.do_entry(opts, false)
    }

    /// Context-free acquisition for callers that cannot guarantee entry and
    /// exit happen on the same thread (async middleware). The entry is
    /// booked under the default context's nodes but never touches the
    /// thread-local entry stack, so it may be exited from any thread.
    pub fn entry_detached(&self, opts: EntryArgs) -> Result<Entry, BlockError> {
        self.do_entry(opts, true)
    }

    fn do_entry(&self, opts: EntryArgs, detached: bool) -> Result<Entry, BlockError> {
        let resource = Resource::new(&opts.resource, opts.traffic);
        let store = self.store();

        let (context_name, origin, entrance, parent_node) = if detached {
            (
                Arc::from(DEFAULT_CONTEXT_NAME),
                opts.origin
                    .as_deref()
                    .filter(|o| !o.is_empty())
                    .map(Arc::from),
                self.entrance_node(DEFAULT_CONTEXT_NAME),
                None,
            )
        } else {
            store.with_installed(
                || self.new_context(DEFAULT_CONTEXT_NAME, opts.origin.as_deref()),
                |ctx| {
                    (
                        Arc::clone(ctx.name()),
                        ctx.origin().cloned(),
                        Arc::clone(ctx.entrance()),
                        ctx.current_node().cloned(),
                    )
                },
            )
        };

        let shared = &self.shared;
        // Entry timing starts before the pipeline so queueing shows up in RT.
        let created_ms = shared.clock.now_ms();
        let mut flight = Flight {
            shared,
            resource: &resource,
            batch: opts.batch,
            prioritized: opts.prioritized,
            args: &opts.args,
            context_name,
            origin,
            entrance,
            parent_node,
            node: None,
            origin_node: None,
            cluster: None,
            param_thread_counted: false,
        };

        let decision = slots::run_chain(&shared.chain, &mut flight);
        let param_thread_counted = flight.param_thread_counted;
        let origin_node = flight.origin_node.take();
        let cluster = flight.cluster.take();
        let node = match flight.node.take() {
            Some(node) => node,
            None => {
                // The selector stage always runs first; reaching this means
                // the chain was emptied out from under us.
                tracing::warn!(resource = %resource, "no node selected for entry");
                Arc::new(DefaultNode::new(
                    resource.clone(),
                    NodeKind::Plain,
                    shared.clock.clone(),
                    shared.config.sample_count,
                    shared.config.interval_ms,
                ))
            }
        };
        drop(flight);

        match decision {
            Decision::Block(err) => {
                if !detached {
                    self.release_auto_context(&store);
                }
                Err(err)
            }
            Decision::Admit | Decision::AdmitAfter(_) => {
                let wait = match decision {
                    Decision::AdmitAfter(d) => Some(d),
                    _ => None,
                };
                let id = shared.entry_seq.fetch_add(1, Ordering::Relaxed);
                if !detached {
                    store.with(|ctx| {
                        if let Some(ctx) = ctx {
                            ctx.stack.push(EntryFrame {
                                id,
                                node: Arc::clone(&node),
                            });
                        }
                    });
                }
                Ok(Entry {
                    id,
                    runtime: self.clone(),
                    resource,
                    node,
                    origin_node,
                    cluster,
                    created_ms,
                    batch: opts.batch,
                    args: opts.args,
                    thread_counted: wait.is_none(),
                    param_thread_counted,
                    wait,
                    detached,
                    error: None,
                    exited: false,
                })
            }
        }
    }

    pub(crate) fn exit_entry(&self, entry: &mut Entry) {
        let shared = &self.shared;
        let store = self.store();

        if !entry.detached {
            self.pop_entry_frame(&store, entry);
        }

        let rt_ms = shared.clock.now_ms().saturating_sub(entry.created_ms);
        let departure = Departure {
            shared,
            resource: &entry.resource,
            batch: entry.batch,
            args: &entry.args,
            node: &entry.node,
            origin_node: entry.origin_node.as_ref(),
            cluster: entry.cluster.as_ref(),
            rt_ms,
            error: entry.error.as_deref(),
            thread_counted: entry.thread_counted,
            param_thread_counted: entry.param_thread_counted,
        };
        slots::unwind_chain(&shared.chain, &departure);

        if !entry.detached {
            self.release_auto_context(&store);
        }
    }

    fn pop_entry_frame(&self, store: &ContextStore, entry: &Entry) {
        store.with(|ctx| {
            let Some(ctx) = ctx else {
                tracing::warn!(resource = %entry.resource, "entry exited outside its context");
                return;
            };
            match ctx.stack.last() {
                Some(top) if top.id == entry.id => {
                    ctx.stack.pop();
                }
                _ => {
                    tracing::warn!(
                        resource = %entry.resource,
                        "entries exited out of order; unwinding best-effort"
                    );
                    if let Some(pos) = ctx.stack.iter().position(|f| f.id == entry.id) {
                        ctx.stack.remove(pos);
                    }
                }
            }
        });
    }

    /// Drops an implicitly created default context once it has no entries.
    fn release_auto_context(&self, store: &ContextStore) {
        let releasable =
            store.with(|ctx| ctx.map(|c| c.is_default() && c.stack.is_empty()).unwrap_or(false));
        if releasable {
            store.clear();
        }
    }

    // Rule management.

    pub fn load_flow_rules(&self, rules: Vec<FlowRule>) -> Result<(), RuleError> {
        self.shared
            .flow_rules
            .load(rules, &self.shared.clock, &self.shared.config)
    }

    pub fn load_degrade_rules(&self, rules: Vec<DegradeRule>) -> Result<(), RuleError> {
        self.shared.degrade_rules.load(rules)
    }

    pub fn load_authority_rules(&self, rules: Vec<AuthorityRule>) -> Result<(), RuleError> {
        self.shared.authority_rules.load(rules)
    }

    pub fn load_system_rules(&self, rules: Vec<SystemRule>) -> Result<(), RuleError> {
        self.shared.system_rules.load(rules)
    }

    pub fn load_param_flow_rules(&self, rules: Vec<ParamFlowRule>) -> Result<(), RuleError> {
        self.shared.param_rules.load(rules)
    }

    pub fn flow_rules(&self) -> Vec<FlowRule> {
        self.shared.flow_rules.rules()
    }

    pub fn degrade_rules(&self) -> Vec<DegradeRule> {
        self.shared.degrade_rules.rules()
    }

    pub fn authority_rules(&self) -> Vec<AuthorityRule> {
        self.shared.authority_rules.rules()
    }

    pub fn system_rules(&self) -> Vec<SystemRule> {
        self.shared.system_rules.rules()
    }

    pub fn param_flow_rules(&self) -> Vec<ParamFlowRule> {
        self.shared.param_rules.rules()
    }

    /// The managers themselves, for change subscriptions
    /// (`manager.on_change(...)`).
    pub fn flow_rule_manager(&self) -> &FlowRuleManager {
        &self.shared.flow_rules
    }

    pub fn degrade_rule_manager(&self) -> &DegradeRuleManager {
        &self.shared.degrade_rules
    }

    pub fn authority_rule_manager(&self) -> &AuthorityRuleManager {
        &self.shared.authority_rules
    }

    pub fn system_rule_manager(&self) -> &SystemRuleManager {
        &self.shared.system_rules
    }

    pub fn param_flow_rule_manager(&self) -> &ParamFlowRuleManager {
        &self.shared.param_rules
    }

    // External collaborators.

    pub fn set_token_service(&self, service: Arc<dyn TokenService>) {
        *self.shared.token_service.write() = Some(service);
    }

    pub fn clear_token_service(&self) {
        *self.shared.token_service.write() = None;
    }

    pub fn set_system_probe(&self, probe: Arc<dyn SystemProbe>) {
        *self.shared.probe.write() = probe;
    }

    // Introspection and administration.

    /// The process-wide cluster node of a resource, if it was ever entered.
    pub fn cluster_node(&self, resource: &str) -> Option<Arc<ClusterNode>> {
        self.shared
            .cluster_nodes
            .get(resource)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// The `k` hottest values currently tracked for an argument slot.
    pub fn hot_param_values(
        &self,
        resource: &str,
        index: usize,
        k: usize,
    ) -> Vec<(ParamValue, i64)> {
        self.shared
            .param_metrics
            .get(resource)
            .map(|metric| metric.top_pass_values(index, k))
            .unwrap_or_default()
    }

    /// Administrative reset of a resource's short metrics, across its
    /// cluster node and every per-context node.
    pub fn reset_metrics(&self, resource: &str) {
        use crate::node::Node;

        if let Some(cluster) = self.shared.cluster_nodes.get(resource) {
            cluster.reset();
        }
        for entry in self.shared.node_cache.iter() {
            if &*entry.key().1 == resource {
                entry.value().reset();
            }
        }
    }
}
