//! Error types for cluster operations.

use thiserror::Error;

use crate::node::NodeName;
use crate::store::ProfileStoreError;

use super::context::Step;

/// Type-erased failure reported by a host driver or runtime installer.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Requests that are well-formed but not allowed in the current state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvalidOperation {
    /// Raised when node-delete targets the control plane.
    #[error("node {node} is the control plane; delete the whole cluster instead")]
    ControlPlaneDeletion {
        /// Control-plane node name.
        node: NodeName,
    },
    /// Raised when start-node targets a deleted node.
    #[error("node {node} has been deleted; use `node add` to create a new node")]
    RetiredNode {
        /// Retired node name.
        node: NodeName,
    },
    /// Raised when a profile is part-way through delete-cluster.
    #[error("the profile is being deleted; re-run delete to finish")]
    TearingDown,
}

/// Broad classification of a [`ClusterError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Profile or node does not exist.
    NotFound,
    /// Profile already exists.
    AlreadyExists,
    /// Operation refused in the current state.
    InvalidOperation,
    /// A driver call failed.
    Backend,
    /// A driver call exceeded the operation deadline.
    Timeout,
    /// The operation was cancelled.
    Cancelled,
    /// The host driver cannot restart stopped machines.
    RestartUnsupported,
    /// A restart attempt failed.
    RestartUnreliable,
    /// Profile records could not be read or written.
    Persistence,
    /// The request itself was malformed.
    InvalidRequest,
}

/// Errors raised by [`crate::Orchestrator`] operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Raised when the profile has no record.
    #[error("profile '{profile}' not found")]
    ProfileNotFound {
        /// Requested profile.
        profile: String,
    },
    /// Raised when a node reference matches nothing active in the profile.
    #[error("node '{node}' not found in profile '{profile}'")]
    NodeNotFound {
        /// Profile searched.
        profile: String,
        /// Reference as supplied by the caller.
        node: String,
    },
    /// Raised when create-cluster targets an existing profile.
    #[error("profile '{profile}' already exists")]
    AlreadyExists {
        /// Existing profile.
        profile: String,
    },
    /// Raised when the operation is not allowed in the current state.
    #[error("invalid operation on profile '{profile}': {reason}")]
    InvalidOperation {
        /// Profile the operation targeted.
        profile: String,
        /// Why the operation was refused.
        #[source]
        reason: InvalidOperation,
    },
    /// Raised when a driver call fails.
    #[error("node {node} of profile '{profile}' failed to {step}: {source}")]
    Backend {
        /// Profile owning the node.
        profile: String,
        /// Node being operated on.
        node: NodeName,
        /// Step that failed.
        step: Step,
        /// Driver error.
        #[source]
        source: DriverError,
    },
    /// Raised when a driver call does not finish before the deadline.
    #[error("node {node} of profile '{profile}' timed out while trying to {step}")]
    Timeout {
        /// Profile owning the node.
        profile: String,
        /// Node being operated on.
        node: NodeName,
        /// Step that was in flight.
        step: Step,
    },
    /// Raised when the operation is cancelled.
    #[error("node {node} of profile '{profile}' was cancelled while trying to {step}")]
    Cancelled {
        /// Profile owning the node.
        profile: String,
        /// Node being operated on.
        node: NodeName,
        /// Step that was in flight.
        step: Step,
    },
    /// Raised when start-node needs a host restart the driver cannot perform.
    #[error(
        "node {node} of profile '{profile}' cannot be restarted by this host driver; delete it and add a new node"
    )]
    RestartUnsupported {
        /// Profile owning the node.
        profile: String,
        /// Node that would need a restart.
        node: NodeName,
    },
    /// Raised when a restart attempt fails. Retrying may succeed.
    #[error("restarting node {node} of profile '{profile}' failed at {step}: {source}")]
    RestartUnreliable {
        /// Profile owning the node.
        profile: String,
        /// Node being restarted.
        node: NodeName,
        /// Step that failed.
        step: Step,
        /// Driver error.
        #[source]
        source: DriverError,
    },
    /// Raised when profile records cannot be read or written.
    #[error("profile store error: {0}")]
    Persistence(#[from] ProfileStoreError),
    /// Raised when the request is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },
}

impl ClusterError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ProfileNotFound { .. } | Self::NodeNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::RestartUnsupported { .. } => ErrorKind::RestartUnsupported,
            Self::RestartUnreliable { .. } => ErrorKind::RestartUnreliable,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
        }
    }

    /// Returns `true` when repeating the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RestartUnreliable { .. })
    }

    /// Converts a failure during start-node into a restart failure.
    pub(crate) fn into_restart_failure(self) -> Self {
        match self {
            Self::Backend {
                profile,
                node,
                step,
                source,
            } => Self::RestartUnreliable {
                profile,
                node,
                step,
                source,
            },
            other => other,
        }
    }
}
