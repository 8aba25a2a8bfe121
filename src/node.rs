//! Node identity, roles, and the combined host/runtime state model.
//!
//! A node's runtime layer only means something while its host is running, so
//! the stored state is a single [`NodeState`] rather than two independent
//! fields. [`HostState`] and [`RuntimeState`] are projections of it, plus the
//! raw values drivers report when probed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role a node plays in its cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// The first node of a cluster. It cannot be removed with node-delete.
    ControlPlane,
    /// Every node added after the control plane.
    Worker,
}

impl NodeRole {
    /// Role assigned to the node with the given 1-based ordinal.
    #[must_use]
    pub const fn for_ordinal(ordinal: u32) -> Self {
        if ordinal <= 1 {
            Self::ControlPlane
        } else {
            Self::Worker
        }
    }

    /// Human-readable label used in status reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ControlPlane => "Control Plane",
            Self::Worker => "Worker",
        }
    }

    /// Stable machine-readable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Name of a node within its cluster (`m01`, `m02`, ...).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// Deterministic name for the node with the given ordinal.
    ///
    /// Only the node store allocates ordinals; public so the binary's unit
    /// tests can construct names.
    #[must_use]
    pub fn for_ordinal(ordinal: u32) -> Self {
        Self(format!("m{ordinal:02}"))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Name of the backend machine hosting a node.
///
/// The control plane's machine carries the profile name itself; workers are
/// suffixed with their node name.
#[must_use]
pub fn machine_name(profile: &str, name: &NodeName, role: NodeRole) -> String {
    match role {
        NodeRole::ControlPlane => profile.to_owned(),
        NodeRole::Worker => format!("{profile}-{name}"),
    }
}

/// Returns `true` when `name` has the shape of a worker machine name,
/// `<profile>-m<digits>`.
///
/// Worker suffixes are split off at the last `-m`, so a profile whose name
/// has this shape is the only way two profiles could share a machine.
#[must_use]
pub fn is_worker_machine_name(name: &str) -> bool {
    name.rsplit_once("-m").is_some_and(|(profile, ordinal)| {
        !profile.is_empty() && !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Raised when a state label reported by a driver is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unrecognised state label '{0}'")]
pub struct StateLabelError(pub String);

macro_rules! layer_state {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        pub enum $name {
            /// The layer is up.
            Running,
            /// The layer exists but is not running.
            Stopped,
            /// The layer does not exist.
            Absent,
        }

        impl $name {
            /// Label used in reports and by the command driver protocol.
            #[must_use]
            pub const fn label(self) -> &'static str {
                match self {
                    Self::Running => "Running",
                    Self::Stopped => "Stopped",
                    Self::Absent => "Absent",
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = StateLabelError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    "running" => Ok(Self::Running),
                    "stopped" => Ok(Self::Stopped),
                    "absent" => Ok(Self::Absent),
                    _ => Err(StateLabelError(value.trim().to_owned())),
                }
            }
        }
    };
}

layer_state!(HostState, "State of a node's host machine.");
layer_state!(RuntimeState, "State of a node's workload runtime.");

/// Combined per-node state.
///
/// There is no value for "runtime running on a stopped host", so that
/// combination cannot be recorded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// Host not running; runtime therefore not running.
    Down,
    /// Host running, runtime not running.
    HostOnly,
    /// Host and runtime both running.
    Full,
}

impl NodeState {
    /// Host layer projection.
    #[must_use]
    pub const fn host(self) -> HostState {
        match self {
            Self::Down => HostState::Stopped,
            Self::HostOnly | Self::Full => HostState::Running,
        }
    }

    /// Runtime layer projection.
    #[must_use]
    pub const fn runtime(self) -> RuntimeState {
        match self {
            Self::Full => RuntimeState::Running,
            Self::Down | Self::HostOnly => RuntimeState::Stopped,
        }
    }

    /// Returns `true` when both layers are running.
    #[must_use]
    pub const fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Folds raw probe results into a combined state.
    ///
    /// A runtime reported running on a host that is not running is recorded
    /// as [`NodeState::Down`] and flagged as a [`ProbeInconsistency`].
    #[must_use]
    pub const fn observe(host: HostState, runtime: RuntimeState) -> Observation {
        match (host, runtime) {
            (HostState::Running, RuntimeState::Running) => Observation {
                state: Self::Full,
                inconsistency: None,
            },
            (HostState::Running, _) => Observation {
                state: Self::HostOnly,
                inconsistency: None,
            },
            (_, RuntimeState::Running) => Observation {
                state: Self::Down,
                inconsistency: Some(ProbeInconsistency { host, runtime }),
            },
            _ => Observation {
                state: Self::Down,
                inconsistency: None,
            },
        }
    }
}

/// Result of folding probe output into a [`NodeState`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Observation {
    /// Combined state to record or report.
    pub state: NodeState,
    /// Set when the probes violated the host/runtime dependency.
    pub inconsistency: Option<ProbeInconsistency>,
}

/// Probe results that contradict the host/runtime dependency.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("runtime reported {runtime} while host is {host}")]
pub struct ProbeInconsistency {
    /// Host state as probed.
    pub host: HostState,
    /// Runtime state as probed.
    pub runtime: RuntimeState,
}

/// A member of a cluster.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Name unique within the cluster.
    pub name: NodeName,
    /// 1-based position in creation order.
    pub ordinal: u32,
    /// Control plane or worker.
    pub role: NodeRole,
    /// Last recorded combined state.
    pub state: NodeState,
}

impl Node {
    /// Backend machine name for this node within `profile`.
    #[must_use]
    pub fn machine_name(&self, profile: &str) -> String {
        machine_name(profile, &self.name, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, "m01", NodeRole::ControlPlane)]
    #[case(2, "m02", NodeRole::Worker)]
    #[case(3, "m03", NodeRole::Worker)]
    #[case(12, "m12", NodeRole::Worker)]
    fn ordinals_map_to_names_and_roles(
        #[case] ordinal: u32,
        #[case] expected_name: &str,
        #[case] expected_role: NodeRole,
    ) {
        assert_eq!(NodeName::for_ordinal(ordinal).as_str(), expected_name);
        assert_eq!(NodeRole::for_ordinal(ordinal), expected_role);
    }

    #[test]
    fn control_plane_machine_uses_profile_name() {
        let name = NodeName::for_ordinal(1);
        assert_eq!(machine_name("p", &name, NodeRole::ControlPlane), "p");
        let worker = NodeName::for_ordinal(3);
        assert_eq!(machine_name("p", &worker, NodeRole::Worker), "p-m03");
    }

    #[rstest]
    #[case("p-m02", true)]
    #[case("multinode-m100", true)]
    #[case("a-m1-m03", true)]
    #[case("p", false)]
    #[case("m02", false)]
    #[case("-m02", false)]
    #[case("p-m", false)]
    #[case("p-mm02", false)]
    #[case("p-m02a", false)]
    fn worker_machine_shape_is_recognised(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_worker_machine_name(name), expected);
    }

    #[test]
    fn worker_machines_are_recognised_for_any_ordinal() {
        for ordinal in [2, 9, 10, 99, 100] {
            let machine = machine_name("p", &NodeName::for_ordinal(ordinal), NodeRole::Worker);
            assert!(is_worker_machine_name(&machine), "{machine}");
        }
    }

    #[rstest]
    #[case(HostState::Running, RuntimeState::Running, NodeState::Full, false)]
    #[case(HostState::Running, RuntimeState::Stopped, NodeState::HostOnly, false)]
    #[case(HostState::Running, RuntimeState::Absent, NodeState::HostOnly, false)]
    #[case(HostState::Stopped, RuntimeState::Stopped, NodeState::Down, false)]
    #[case(HostState::Absent, RuntimeState::Absent, NodeState::Down, false)]
    #[case(HostState::Stopped, RuntimeState::Running, NodeState::Down, true)]
    #[case(HostState::Absent, RuntimeState::Running, NodeState::Down, true)]
    fn observe_never_upgrades_runtime_on_stopped_host(
        #[case] host: HostState,
        #[case] runtime: RuntimeState,
        #[case] expected: NodeState,
        #[case] inconsistent: bool,
    ) {
        let observation = NodeState::observe(host, runtime);
        assert_eq!(observation.state, expected);
        assert_eq!(observation.inconsistency.is_some(), inconsistent);
    }

    #[test]
    fn projections_keep_runtime_down_when_host_down() {
        assert_eq!(NodeState::Down.host(), HostState::Stopped);
        assert_eq!(NodeState::Down.runtime(), RuntimeState::Stopped);
        assert_eq!(NodeState::HostOnly.runtime(), RuntimeState::Stopped);
        assert_eq!(NodeState::Full.runtime(), RuntimeState::Running);
    }

    #[rstest]
    #[case(" Running\n", HostState::Running)]
    #[case("STOPPED", HostState::Stopped)]
    #[case("absent", HostState::Absent)]
    fn host_state_parses_driver_labels(#[case] raw: &str, #[case] expected: HostState) {
        assert_eq!(raw.parse::<HostState>(), Ok(expected));
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = "Paused".parse::<RuntimeState>().expect_err("label should fail");
        assert_eq!(err, StateLabelError(String::from("Paused")));
    }
}
