//! Core library for the Flotilla cluster lifecycle tool.
//!
//! A profile names one cluster of nodes. Each node has a host layer managed
//! by a [`HostDriver`] and a runtime layer managed by a
//! [`RuntimeInstaller`]; the [`Orchestrator`] sequences both for every
//! lifecycle operation and persists node state through a [`ProfileStore`].
//! [`StatusReporter`] turns live probes into the report and exit code of
//! `flotilla status`.

pub mod command_driver;
pub mod config;
pub mod driver;
pub mod node;
pub mod orchestrator;
pub mod process;
pub mod simulated;
pub mod status;
pub mod store;
pub mod test_support;
pub mod util;

pub use command_driver::{CommandDriver, CommandDriverConfig, CommandDriverError};
pub use config::{ConfigError, DriverKind, FlotillaConfig};
pub use driver::{HostDriver, Machine, ProvisionOptions, RequestError, RuntimeInstaller};
pub use node::{HostState, Node, NodeName, NodeRole, NodeState, RuntimeState};
pub use orchestrator::{
    ClusterError, ErrorKind, InvalidOperation, OperationContext, Orchestrator, StartOutcome,
    Step, StopOutcome,
};
pub use process::{
    CommandError, CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner,
};
pub use simulated::{SimulatedDriver, SimulatedDriverError, SimulatedOp};
pub use status::{
    ClusterHealth, EXIT_DEGRADED, EXIT_OK, EXIT_UNAVAILABLE, ExitCodes, NodeReport,
    OutputFormat, StatusReporter, StatusSnapshot,
};
pub use store::{FileProfileStore, NodeStore, ProfileRegistry, ProfileStore, ProfileStoreError};
