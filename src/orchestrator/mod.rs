//! Cluster lifecycle orchestration.
//!
//! [`Orchestrator`] sequences host driver and runtime installer calls for
//! every mutation, recording and persisting node state after each step. The
//! runtime is always stopped before its host and started after it. Every
//! driver call runs under the [`OperationContext`] deadline and can be
//! cancelled; a cancelled step is followed by a bounded re-probe so the
//! store reflects what the backend actually reports.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::driver::{HostDriver, Machine, ProvisionOptions, RuntimeInstaller};
use crate::node::{
    HostState, Node, NodeName, NodeRole, NodeState, RuntimeState, is_worker_machine_name,
};
use crate::status::{NodeReport, StatusSnapshot};
use crate::store::{
    NodeLookup, NodeStore, ProfilePhase, ProfileRegistry, ProfileStore, is_valid_profile_name,
};

mod context;
mod error;

pub use context::{Layer, OperationContext, Step};
pub use error::{ClusterError, DriverError, ErrorKind, InvalidOperation};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of stop-node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopOutcome {
    /// The node was running and has been stopped.
    Stopped,
    /// The node was already stopped; nothing was done.
    AlreadyStopped,
}

/// Result of start-node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartOutcome {
    /// The node has been started.
    Started,
    /// The node was already fully running; nothing was done.
    AlreadyRunning,
}

/// Drives cluster operations against a host driver, a runtime installer, and
/// the profile registry.
#[derive(Debug)]
pub struct Orchestrator<H, R, P> {
    host: H,
    runtime: R,
    registry: ProfileRegistry<P>,
    poll_interval: Duration,
    reconcile_timeout: Duration,
}

impl<H, R, P> Orchestrator<H, R, P>
where
    H: HostDriver,
    R: RuntimeInstaller,
    P: ProfileStore,
{
    /// Creates an orchestrator persisting profiles through `persistence`.
    #[must_use]
    pub fn new(host: H, runtime: R, persistence: P) -> Self {
        Self {
            host,
            runtime,
            registry: ProfileRegistry::new(persistence),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }

    /// Overrides how often readiness probes are repeated.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the bound on re-probes after cancellation.
    #[must_use]
    pub const fn with_reconcile_timeout(mut self, limit: Duration) -> Self {
        self.reconcile_timeout = limit;
        self
    }

    /// Host driver in use.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Runtime installer in use.
    #[must_use]
    pub const fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Profile registry in use.
    #[must_use]
    pub const fn registry(&self) -> &ProfileRegistry<P> {
        &self.registry
    }

    /// Creates profile `profile` with `count` nodes and brings each one up.
    ///
    /// Nodes are provisioned in ordinal order. A failure stops the sequence;
    /// nodes already running stay running and the profile keeps every node
    /// allocated so far.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::InvalidRequest`] for a bad name, count, or
    /// options, [`ClusterError::AlreadyExists`] when the profile exists, and
    /// driver, timeout, cancellation, or persistence errors from provisioning.
    pub async fn create_cluster(
        &self,
        profile: &str,
        count: u32,
        options: ProvisionOptions,
        ctx: &OperationContext,
    ) -> Result<Vec<Node>, ClusterError> {
        validate_profile(profile)?;
        if count == 0 {
            return Err(ClusterError::InvalidRequest {
                message: String::from("a cluster needs at least one node"),
            });
        }
        options
            .validate()
            .map_err(|err| ClusterError::InvalidRequest {
                message: err.to_string(),
            })?;

        let mut guard = self.registry.lock(profile).await?;
        if guard.store().is_some() {
            return Err(ClusterError::AlreadyExists {
                profile: profile.to_owned(),
            });
        }
        let fresh = NodeStore::new(profile, options);
        self.registry.save(&fresh)?;
        let store = guard.insert(fresh);

        for _ in 0..count {
            let node = store.allocate();
            self.registry.save(store)?;
            self.provision(store, &node, ctx).await?;
        }
        info!(profile, nodes = count, "cluster created");
        Ok(store.nodes().to_vec())
    }

    /// Adds a worker to `profile` using the cluster's provisioning options.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::ProfileNotFound`], an
    /// [`InvalidOperation::TearingDown`] refusal, or provisioning errors.
    pub async fn add_node(
        &self,
        profile: &str,
        ctx: &OperationContext,
    ) -> Result<Node, ClusterError> {
        let mut guard = self.registry.lock(profile).await?;
        let store = active_store(guard.store_mut(), profile)?;
        let node = store.allocate();
        self.registry.save(store)?;
        self.provision(store, &node, ctx).await?;
        info!(profile, node = %node.name, "node added");
        Ok(current(store, &node.name).unwrap_or(node))
    }

    /// Stops the runtime and then the host of one node.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::ProfileNotFound`] or
    /// [`ClusterError::NodeNotFound`], an [`InvalidOperation::TearingDown`]
    /// refusal, or driver, timeout, cancellation, or persistence errors.
    pub async fn stop_node(
        &self,
        profile: &str,
        reference: &str,
        ctx: &OperationContext,
    ) -> Result<StopOutcome, ClusterError> {
        let mut guard = self.registry.lock(profile).await?;
        let store = active_store(guard.store_mut(), profile)?;
        let node = resolve_active(store, reference)?;
        let outcome = self.halt(store, &node, ctx).await?;
        if outcome == StopOutcome::Stopped {
            info!(profile, node = %node.name, "node stopped");
        }
        Ok(outcome)
    }

    /// Starts the host and then the runtime of a stopped node.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidOperation::RetiredNode`] for deleted nodes,
    /// [`ClusterError::RestartUnsupported`] when the host driver cannot
    /// restart machines, [`ClusterError::RestartUnreliable`] when a driver
    /// step fails, and the lookup, timeout, cancellation, and persistence
    /// errors of the other operations.
    pub async fn start_node(
        &self,
        profile: &str,
        reference: &str,
        ctx: &OperationContext,
    ) -> Result<StartOutcome, ClusterError> {
        let mut guard = self.registry.lock(profile).await?;
        let store = active_store(guard.store_mut(), profile)?;
        let node = match store.lookup(reference) {
            NodeLookup::Active(node) => node,
            NodeLookup::Retired(name) => {
                return Err(invalid(profile, InvalidOperation::RetiredNode { node: name }));
            }
            NodeLookup::Unknown => return Err(node_not_found(profile, reference)),
        };

        match node.state {
            NodeState::Full => return Ok(StartOutcome::AlreadyRunning),
            NodeState::Down if !self.host.supports_restart() => {
                return Err(ClusterError::RestartUnsupported {
                    profile: profile.to_owned(),
                    node: node.name,
                });
            }
            NodeState::Down | NodeState::HostOnly => {}
        }

        let machine = Machine::for_node(profile, &node, store.options());
        let result = self.restart(store, &node, &machine, ctx).await;
        let outcome = self
            .settle(store, &machine, result)
            .await
            .map_err(ClusterError::into_restart_failure)?;
        info!(profile, node = %node.name, "node started");
        Ok(outcome)
    }

    /// Stops and destroys a worker, retiring its name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidOperation::ControlPlaneDeletion`] for the first
    /// node, lookup errors for unknown or already deleted nodes, and driver,
    /// timeout, cancellation, or persistence errors.
    pub async fn delete_node(
        &self,
        profile: &str,
        reference: &str,
        ctx: &OperationContext,
    ) -> Result<Node, ClusterError> {
        let mut guard = self.registry.lock(profile).await?;
        let store = active_store(guard.store_mut(), profile)?;
        let node = resolve_active(store, reference)?;
        if node.role == NodeRole::ControlPlane {
            return Err(invalid(
                profile,
                InvalidOperation::ControlPlaneDeletion { node: node.name },
            ));
        }
        let removed = self.teardown(store, &node, ctx).await?;
        info!(profile, node = %removed.name, "node deleted");
        Ok(removed)
    }

    /// Stops every node, workers first in reverse order and the control
    /// plane last.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while stopping a node; nodes stopped
    /// before it stay stopped.
    pub async fn stop_cluster(
        &self,
        profile: &str,
        ctx: &OperationContext,
    ) -> Result<Vec<(NodeName, StopOutcome)>, ClusterError> {
        let mut guard = self.registry.lock(profile).await?;
        let store = active_store(guard.store_mut(), profile)?;
        let nodes: Vec<Node> = store.nodes().iter().rev().cloned().collect();
        let mut outcomes = Vec::with_capacity(nodes.len());
        for node in nodes {
            let outcome = self.halt(store, &node, ctx).await?;
            outcomes.push((node.name, outcome));
        }
        info!(profile, "cluster stopped");
        Ok(outcomes)
    }

    /// Tears down every node and removes the profile.
    ///
    /// The profile is marked as tearing down before any driver call, so a
    /// partial failure leaves a profile that refuses other mutations while
    /// this operation can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::ProfileNotFound`] for unknown profiles and the
    /// first driver, timeout, cancellation, or persistence error otherwise.
    pub async fn delete_cluster(
        &self,
        profile: &str,
        ctx: &OperationContext,
    ) -> Result<(), ClusterError> {
        let mut guard = self.registry.lock(profile).await?;
        let store = guard
            .store_mut()
            .ok_or_else(|| profile_not_found(profile))?;
        store.set_phase(ProfilePhase::TearingDown);
        self.registry.save(store)?;

        let nodes: Vec<Node> = store.nodes().iter().rev().cloned().collect();
        for node in nodes {
            self.teardown(store, &node, ctx).await?;
        }
        self.registry.discard(&mut guard)?;
        info!(profile, "cluster deleted");
        Ok(())
    }

    /// Probes every active node and returns a fresh snapshot.
    ///
    /// The node list is the last saved record, so a mutation in progress on
    /// the same profile never delays the query. A failing probe never fails
    /// the whole query: that node is reported as not running and the error
    /// is attached to its report.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::ProfileNotFound`] or
    /// [`ClusterError::Persistence`] when the profile cannot be read.
    pub async fn status(
        &self,
        profile: &str,
        ctx: &OperationContext,
    ) -> Result<StatusSnapshot, ClusterError> {
        let store = self
            .registry
            .snapshot(profile)?
            .ok_or_else(|| profile_not_found(profile))?;

        let mut nodes = Vec::with_capacity(store.len());
        for node in store.nodes() {
            let machine = Machine::for_node(profile, node, store.options());
            nodes.push(self.probe_report(node, machine, ctx).await);
        }
        Ok(StatusSnapshot {
            profile: profile.to_owned(),
            nodes,
        })
    }

    /// Names of every stored profile.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Persistence`] when listing fails.
    pub fn list_profiles(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self.registry.profiles()?)
    }

    /// Recorded nodes of `profile`, without probing.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::ProfileNotFound`] or
    /// [`ClusterError::Persistence`].
    pub fn list_nodes(&self, profile: &str) -> Result<Vec<Node>, ClusterError> {
        self.registry
            .snapshot(profile)?
            .map(|store| store.nodes().to_vec())
            .ok_or_else(|| profile_not_found(profile))
    }

    async fn provision(
        &self,
        store: &mut NodeStore,
        node: &Node,
        ctx: &OperationContext,
    ) -> Result<(), ClusterError> {
        let machine = Machine::for_node(store.profile(), node, store.options());
        let result = self.bring_up(store, &machine, ctx).await;
        self.settle(store, &machine, result).await.map(drop)
    }

    async fn bring_up(
        &self,
        store: &mut NodeStore,
        machine: &Machine,
        ctx: &OperationContext,
    ) -> Result<StartOutcome, ClusterError> {
        guarded(ctx, machine, Step::CreateHost, self.host.create(machine)).await?;
        self.await_host(machine, ctx).await?;
        self.record(store, &machine.node, NodeState::HostOnly)?;

        guarded(ctx, machine, Step::InstallRuntime, self.runtime.install(machine)).await?;
        guarded(ctx, machine, Step::StartRuntime, self.runtime.start(machine)).await?;
        self.await_runtime(machine, ctx).await?;
        self.record(store, &machine.node, NodeState::Full)?;
        Ok(StartOutcome::Started)
    }

    async fn restart(
        &self,
        store: &mut NodeStore,
        node: &Node,
        machine: &Machine,
        ctx: &OperationContext,
    ) -> Result<StartOutcome, ClusterError> {
        if node.state == NodeState::Down {
            guarded(ctx, machine, Step::StartHost, self.host.start(machine)).await?;
            self.await_host(machine, ctx).await?;
            self.record(store, &node.name, NodeState::HostOnly)?;
        }
        guarded(ctx, machine, Step::StartRuntime, self.runtime.start(machine)).await?;
        self.await_runtime(machine, ctx).await?;
        self.record(store, &node.name, NodeState::Full)?;
        Ok(StartOutcome::Started)
    }

    async fn halt(
        &self,
        store: &mut NodeStore,
        node: &Node,
        ctx: &OperationContext,
    ) -> Result<StopOutcome, ClusterError> {
        if node.state == NodeState::Down {
            return Ok(StopOutcome::AlreadyStopped);
        }
        let machine = Machine::for_node(store.profile(), node, store.options());
        let result = self.stop_layers(store, node, &machine, ctx).await;
        self.settle(store, &machine, result).await
    }

    async fn stop_layers(
        &self,
        store: &mut NodeStore,
        node: &Node,
        machine: &Machine,
        ctx: &OperationContext,
    ) -> Result<StopOutcome, ClusterError> {
        if node.state == NodeState::Full {
            guarded(ctx, machine, Step::StopRuntime, self.runtime.stop(machine)).await?;
            self.record(store, &node.name, NodeState::HostOnly)?;
        }
        guarded(ctx, machine, Step::StopHost, self.host.stop(machine)).await?;
        self.record(store, &node.name, NodeState::Down)?;
        Ok(StopOutcome::Stopped)
    }

    async fn teardown(
        &self,
        store: &mut NodeStore,
        node: &Node,
        ctx: &OperationContext,
    ) -> Result<Node, ClusterError> {
        let machine = Machine::for_node(store.profile(), node, store.options());
        let result = self.destroy_layers(store, node, &machine, ctx).await;
        self.settle(store, &machine, result).await
    }

    async fn destroy_layers(
        &self,
        store: &mut NodeStore,
        node: &Node,
        machine: &Machine,
        ctx: &OperationContext,
    ) -> Result<Node, ClusterError> {
        if node.state == NodeState::Full {
            guarded(ctx, machine, Step::StopRuntime, self.runtime.stop(machine)).await?;
            self.record(store, &node.name, NodeState::HostOnly)?;
        }
        guarded(ctx, machine, Step::DestroyHost, self.host.destroy(machine)).await?;
        let removed = store.retire(&node.name).unwrap_or_else(|| node.clone());
        self.registry.save(store)?;
        Ok(removed)
    }

    /// Reconciles the store after a cancelled step before handing `result`
    /// back.
    async fn settle<T>(
        &self,
        store: &mut NodeStore,
        machine: &Machine,
        result: Result<T, ClusterError>,
    ) -> Result<T, ClusterError> {
        if let Err(ClusterError::Cancelled { step, .. }) = &result {
            debug!(profile = %machine.profile, node = %machine.node, %step, "reconciling after cancellation");
            self.reconcile(store, machine).await;
        }
        result
    }

    async fn reconcile(&self, store: &mut NodeStore, machine: &Machine) {
        let observed = match timeout(self.reconcile_timeout, self.observe(machine)).await {
            Ok(Ok(state)) => state,
            Ok(Err(err)) => {
                warn!(profile = %machine.profile, node = %machine.node, error = %err, "re-probe failed; keeping recorded state");
                return;
            }
            Err(_) => {
                warn!(profile = %machine.profile, node = %machine.node, "re-probe timed out; keeping recorded state");
                return;
            }
        };
        if let Err(err) = self.record(store, &machine.node, observed) {
            warn!(profile = %machine.profile, node = %machine.node, error = %err, "failed to persist re-probed state");
        }
    }

    async fn observe(&self, machine: &Machine) -> Result<NodeState, DriverError> {
        let host = self.host.probe(machine).await.map_err(DriverError::from)?;
        let runtime = if host == HostState::Running {
            self.runtime
                .probe(machine)
                .await
                .map_err(DriverError::from)?
        } else {
            RuntimeState::Stopped
        };
        Ok(NodeState::observe(host, runtime).state)
    }

    async fn probe_report(
        &self,
        node: &Node,
        machine: Machine,
        ctx: &OperationContext,
    ) -> NodeReport {
        let host = guarded(ctx, &machine, Step::ProbeHost, self.host.probe(&machine)).await;
        let (state, probe_error) = match host {
            Err(err) => {
                warn!(profile = %machine.profile, node = %node.name, error = %err, "host probe failed; reporting node as stopped");
                (NodeState::Down, Some(err.to_string()))
            }
            Ok(HostState::Absent) => {
                warn!(profile = %machine.profile, node = %node.name, "machine is absent; reporting node as stopped");
                (NodeState::Down, Some(format!("machine {} is absent", machine.name)))
            }
            Ok(host_state) => self.probe_runtime(node, &machine, host_state, ctx).await,
        };

        NodeReport {
            name: node.name.clone(),
            machine: machine.name,
            role: node.role,
            state,
            probe_error,
        }
    }

    /// Runtime half of a status probe. A stopped host is still probed so a
    /// runtime claiming to run on it is logged.
    async fn probe_runtime(
        &self,
        node: &Node,
        machine: &Machine,
        host: HostState,
        ctx: &OperationContext,
    ) -> (NodeState, Option<String>) {
        match guarded(ctx, machine, Step::ProbeRuntime, self.runtime.probe(machine)).await {
            Err(err) if host == HostState::Running => {
                warn!(profile = %machine.profile, node = %node.name, error = %err, "runtime probe failed; reporting kubelet as stopped");
                (NodeState::HostOnly, Some(err.to_string()))
            }
            Err(_) => (NodeState::observe(host, RuntimeState::Stopped).state, None),
            Ok(runtime) => {
                let observation = NodeState::observe(host, runtime);
                if let Some(inconsistency) = observation.inconsistency {
                    warn!(profile = %machine.profile, node = %node.name, %inconsistency, "inconsistent probe results; reporting kubelet as stopped");
                }
                (observation.state, None)
            }
        }
    }

    async fn await_host(&self, machine: &Machine, ctx: &OperationContext) -> Result<(), ClusterError> {
        loop {
            let state = guarded(ctx, machine, Step::AwaitHost, self.host.probe(machine)).await?;
            if state == HostState::Running {
                return Ok(());
            }
            self.pause(machine, Step::AwaitHost, ctx).await?;
        }
    }

    async fn await_runtime(
        &self,
        machine: &Machine,
        ctx: &OperationContext,
    ) -> Result<(), ClusterError> {
        loop {
            let state =
                guarded(ctx, machine, Step::AwaitRuntime, self.runtime.probe(machine)).await?;
            if state == RuntimeState::Running {
                return Ok(());
            }
            self.pause(machine, Step::AwaitRuntime, ctx).await?;
        }
    }

    async fn pause(
        &self,
        machine: &Machine,
        step: Step,
        ctx: &OperationContext,
    ) -> Result<(), ClusterError> {
        let interval = self.poll_interval;
        guarded(ctx, machine, step, async move {
            sleep(interval).await;
            Ok::<(), std::convert::Infallible>(())
        })
        .await
    }

    fn record(
        &self,
        store: &mut NodeStore,
        name: &NodeName,
        state: NodeState,
    ) -> Result<(), ClusterError> {
        store.set_state(name, state);
        self.registry.save(store)?;
        debug!(profile = store.profile(), node = %name, ?state, "state recorded");
        Ok(())
    }
}

/// Runs one driver call under the context deadline and cancellation token.
async fn guarded<T, E, F>(
    ctx: &OperationContext,
    machine: &Machine,
    step: Step,
    operation: F,
) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    debug!(profile = %machine.profile, node = %machine.node, %step, "driver step");
    tokio::select! {
        biased;
        () = ctx.cancellation().cancelled() => Err(ClusterError::Cancelled {
            profile: machine.profile.clone(),
            node: machine.node.clone(),
            step,
        }),
        outcome = timeout_at(ctx.deadline(), operation) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ClusterError::Backend {
                profile: machine.profile.clone(),
                node: machine.node.clone(),
                step,
                source: Box::new(err),
            }),
            Err(_) => Err(ClusterError::Timeout {
                profile: machine.profile.clone(),
                node: machine.node.clone(),
                step,
            }),
        },
    }
}

fn validate_profile(profile: &str) -> Result<(), ClusterError> {
    if !is_valid_profile_name(profile) {
        return Err(ClusterError::InvalidRequest {
            message: format!(
                "invalid profile name '{profile}': use ASCII letters, digits, '-', '_' or '.'"
            ),
        });
    }
    // The control plane's machine carries the profile name, so it must never
    // look like another profile's worker machine.
    if is_worker_machine_name(profile) {
        return Err(ClusterError::InvalidRequest {
            message: format!(
                "invalid profile name '{profile}': names ending in '-m' and digits are \
                 reserved for worker machines"
            ),
        });
    }
    Ok(())
}

fn active_store<'a>(
    store: Option<&'a mut NodeStore>,
    profile: &str,
) -> Result<&'a mut NodeStore, ClusterError> {
    let found = store.ok_or_else(|| profile_not_found(profile))?;
    if found.phase() == ProfilePhase::TearingDown {
        return Err(invalid(profile, InvalidOperation::TearingDown));
    }
    Ok(found)
}

fn resolve_active(store: &NodeStore, reference: &str) -> Result<Node, ClusterError> {
    store
        .node(reference)
        .cloned()
        .ok_or_else(|| node_not_found(store.profile(), reference))
}

fn current(store: &NodeStore, name: &NodeName) -> Option<Node> {
    store.nodes().iter().find(|node| &node.name == name).cloned()
}

fn profile_not_found(profile: &str) -> ClusterError {
    ClusterError::ProfileNotFound {
        profile: profile.to_owned(),
    }
}

fn node_not_found(profile: &str, reference: &str) -> ClusterError {
    ClusterError::NodeNotFound {
        profile: profile.to_owned(),
        node: reference.to_owned(),
    }
}

fn invalid(profile: &str, reason: InvalidOperation) -> ClusterError {
    ClusterError::InvalidOperation {
        profile: profile.to_owned(),
        reason,
    }
}
