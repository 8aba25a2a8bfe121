//! Shared fixtures for cluster lifecycle scenarios.

use std::future::Future;
use std::time::Duration;

use flotilla::test_support::MemoryProfileStore;
use flotilla::{
    ClusterError, ClusterHealth, ErrorKind, OperationContext, Orchestrator, SimulatedDriver,
};
use rstest::fixture;
use tokio::runtime::Runtime;

pub type TestOrchestrator = Orchestrator<SimulatedDriver, SimulatedDriver, MemoryProfileStore>;

#[derive(Clone, Debug)]
pub struct ClusterContext {
    pub driver: SimulatedDriver,
    pub persistence: MemoryProfileStore,
    pub last_error: Option<ErrorKind>,
}

impl ClusterContext {
    /// Builds an orchestrator over the shared driver and records, as a new
    /// CLI process would.
    pub fn orchestrator(&self) -> TestOrchestrator {
        Orchestrator::new(
            self.driver.clone(),
            self.driver.clone(),
            self.persistence.clone(),
        )
        .with_poll_interval(Duration::from_millis(1))
    }

    /// Records the error kind of `result`, clearing it on success.
    pub fn remember<T>(&mut self, result: Result<T, ClusterError>) {
        self.last_error = result.err().map(|err| err.kind());
    }
}

#[fixture]
pub fn cluster_context() -> ClusterContext {
    ClusterContext {
        driver: SimulatedDriver::new(),
        persistence: MemoryProfileStore::new(),
        last_error: None,
    }
}

pub fn ctx() -> OperationContext {
    OperationContext::with_timeout(Duration::from_secs(10))
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    Runtime::new()
        .unwrap_or_else(|err| panic!("tokio runtime: {err}"))
        .block_on(future)
}

pub const fn error_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not-found",
        ErrorKind::AlreadyExists => "already-exists",
        ErrorKind::InvalidOperation => "invalid-operation",
        ErrorKind::Backend => "backend",
        ErrorKind::Timeout => "timeout",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::RestartUnsupported => "restart-unsupported",
        ErrorKind::RestartUnreliable => "restart-unreliable",
        ErrorKind::Persistence => "persistence",
        ErrorKind::InvalidRequest => "invalid-request",
    }
}

pub fn parse_health(label: &str) -> Option<ClusterHealth> {
    match label {
        "healthy" => Some(ClusterHealth::Healthy),
        "degraded" => Some(ClusterHealth::Degraded),
        "unavailable" => Some(ClusterHealth::Unavailable),
        _ => None,
    }
}
