//! Deadlines, cancellation, and step names for a single operation.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound applied to caller-supplied timeouts.
const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Deadline and cancellation signal shared by every driver call of one
/// operation.
#[derive(Clone, Debug)]
pub struct OperationContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl OperationContext {
    /// Context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout.min(MAX_TIMEOUT))
    }

    /// Context expiring at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token, typically with a child of a token the
    /// caller controls.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Instant after which driver calls fail with a timeout.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Token that cancels the operation.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Layer a step acts on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    /// The machine.
    Host,
    /// The workload runtime.
    Runtime,
}

/// One driver-facing step of an operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Create the machine.
    CreateHost,
    /// Boot a stopped machine.
    StartHost,
    /// Shut the machine down.
    StopHost,
    /// Destroy the machine.
    DestroyHost,
    /// Probe the machine.
    ProbeHost,
    /// Poll until the machine reports running.
    AwaitHost,
    /// Install the runtime.
    InstallRuntime,
    /// Start the runtime.
    StartRuntime,
    /// Stop the runtime.
    StopRuntime,
    /// Probe the runtime.
    ProbeRuntime,
    /// Poll until the runtime reports running.
    AwaitRuntime,
}

impl Step {
    /// Layer this step acts on.
    #[must_use]
    pub const fn layer(self) -> Layer {
        match self {
            Self::CreateHost
            | Self::StartHost
            | Self::StopHost
            | Self::DestroyHost
            | Self::ProbeHost
            | Self::AwaitHost => Layer::Host,
            Self::InstallRuntime
            | Self::StartRuntime
            | Self::StopRuntime
            | Self::ProbeRuntime
            | Self::AwaitRuntime => Layer::Runtime,
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::CreateHost => "create host",
            Self::StartHost => "start host",
            Self::StopHost => "stop host",
            Self::DestroyHost => "destroy host",
            Self::ProbeHost => "probe host",
            Self::AwaitHost => "wait for host",
            Self::InstallRuntime => "install runtime",
            Self::StartRuntime => "start runtime",
            Self::StopRuntime => "stop runtime",
            Self::ProbeRuntime => "probe runtime",
            Self::AwaitRuntime => "wait for runtime",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.describe())
    }
}
