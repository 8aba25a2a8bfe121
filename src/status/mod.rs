//! Status snapshots, aggregate health, and report rendering.
//!
//! The process exit code of `flotilla status` is derived here and nowhere
//! else:
//!
//! | code | meaning |
//! |------|---------|
//! | [`EXIT_OK`] (0) | every node has host and kubelet running |
//! | [`EXIT_DEGRADED`] (7) | some nodes are fully running, others are not |
//! | [`EXIT_UNAVAILABLE`] (8) | no node is fully running, or status could not be determined |
//!
//! The non-zero codes can be overridden through configuration.

use std::fmt::Write as _;

use serde::Serialize;
use thiserror::Error;

use crate::node::{HostState, NodeName, NodeRole, NodeState, RuntimeState};

/// Exit code for a cluster whose nodes are all fully running.
pub const EXIT_OK: i32 = 0;

/// Exit code for a cluster with some, but not all, nodes fully running.
pub const EXIT_DEGRADED: i32 = 7;

/// Exit code for a cluster with no fully running node, or whose status could
/// not be determined.
pub const EXIT_UNAVAILABLE: i32 = 8;

/// Aggregate health of a cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterHealth {
    /// Every node is fully running.
    Healthy,
    /// At least one node is fully running and at least one is not.
    Degraded,
    /// No node is fully running.
    Unavailable,
}

/// Mapping from [`ClusterHealth`] to process exit codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitCodes {
    /// Code for [`ClusterHealth::Degraded`].
    pub degraded: i32,
    /// Code for [`ClusterHealth::Unavailable`] and for status failures.
    pub unavailable: i32,
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self {
            degraded: EXIT_DEGRADED,
            unavailable: EXIT_UNAVAILABLE,
        }
    }
}

impl ExitCodes {
    /// Exit code reported for `health`.
    #[must_use]
    pub const fn for_health(self, health: ClusterHealth) -> i32 {
        match health {
            ClusterHealth::Healthy => EXIT_OK,
            ClusterHealth::Degraded => self.degraded,
            ClusterHealth::Unavailable => self.unavailable,
        }
    }
}

/// Live-probed state of one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeReport {
    /// Node name.
    pub name: NodeName,
    /// Backend machine name.
    pub machine: String,
    /// Node role.
    pub role: NodeRole,
    /// State folded from the probes.
    pub state: NodeState,
    /// Set when a probe failed; the node is then reported as not running.
    pub probe_error: Option<String>,
}

impl NodeReport {
    /// Host label as rendered in reports.
    #[must_use]
    pub const fn host(&self) -> HostState {
        self.state.host()
    }

    /// Runtime label as rendered in reports.
    #[must_use]
    pub const fn kubelet(&self) -> RuntimeState {
        self.state.runtime()
    }
}

/// Point-in-time view of every active node of a profile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    /// Profile the snapshot describes.
    pub profile: String,
    /// One report per active node, in creation order.
    pub nodes: Vec<NodeReport>,
}

impl StatusSnapshot {
    /// Aggregate health, independent of the order nodes were probed in.
    #[must_use]
    pub fn health(&self) -> ClusterHealth {
        let full = self
            .nodes
            .iter()
            .filter(|report| report.state.is_full())
            .count();
        if full == 0 {
            ClusterHealth::Unavailable
        } else if full == self.nodes.len() {
            ClusterHealth::Healthy
        } else {
            ClusterHealth::Degraded
        }
    }
}

/// Report layouts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    /// One block per node for people.
    #[default]
    Text,
    /// One tab-separated line per node.
    Summary,
    /// A JSON document.
    Json,
}

/// Raised when a report cannot be rendered.
#[derive(Debug, Error)]
pub enum RenderError {
    /// JSON encoding failed.
    #[error("failed to encode status as JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing to the output buffer failed.
    #[error("failed to format status: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Renders [`StatusSnapshot`] values and derives their exit codes.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusReporter {
    format: OutputFormat,
    codes: ExitCodes,
}

#[derive(Serialize)]
struct JsonNode<'a> {
    name: &'a NodeName,
    machine: &'a str,
    role: NodeRole,
    host: HostState,
    kubelet: RuntimeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    probe_error: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    profile: &'a str,
    health: ClusterHealth,
    exit_code: i32,
    nodes: Vec<JsonNode<'a>>,
}

impl StatusReporter {
    /// Creates a reporter for `format` using `codes`.
    #[must_use]
    pub const fn new(format: OutputFormat, codes: ExitCodes) -> Self {
        Self { format, codes }
    }

    /// Exit code for `snapshot`.
    #[must_use]
    pub fn exit_code(&self, snapshot: &StatusSnapshot) -> i32 {
        self.codes.for_health(snapshot.health())
    }

    /// Exit code used when status could not be determined at all.
    #[must_use]
    pub const fn failure_code(&self) -> i32 {
        self.codes.unavailable
    }

    /// Renders `snapshot` in the configured format.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when encoding fails.
    pub fn render(&self, snapshot: &StatusSnapshot) -> Result<String, RenderError> {
        match self.format {
            OutputFormat::Text => render_text(snapshot),
            OutputFormat::Summary => render_summary(snapshot),
            OutputFormat::Json => self.render_json(snapshot),
        }
    }

    fn render_json(&self, snapshot: &StatusSnapshot) -> Result<String, RenderError> {
        let report = JsonReport {
            profile: &snapshot.profile,
            health: snapshot.health(),
            exit_code: self.exit_code(snapshot),
            nodes: snapshot
                .nodes
                .iter()
                .map(|node| JsonNode {
                    name: &node.name,
                    machine: &node.machine,
                    role: node.role,
                    host: node.host(),
                    kubelet: node.kubelet(),
                    probe_error: node.probe_error.as_deref(),
                })
                .collect(),
        };
        let mut rendered = serde_json::to_string_pretty(&report)?;
        rendered.push('\n');
        Ok(rendered)
    }
}

fn render_text(snapshot: &StatusSnapshot) -> Result<String, RenderError> {
    let mut out = String::new();
    for node in &snapshot.nodes {
        writeln!(out, "{}", node.machine)?;
        writeln!(out, "type: {}", node.role.label())?;
        writeln!(out, "host: {}", node.host())?;
        writeln!(out, "kubelet: {}", node.kubelet())?;
        writeln!(out)?;
    }
    Ok(out)
}

fn render_summary(snapshot: &StatusSnapshot) -> Result<String, RenderError> {
    let mut out = String::new();
    for node in &snapshot.nodes {
        writeln!(
            out,
            "{}\t{}\t{}\thost={}\tkubelet={}",
            node.name,
            node.machine,
            node.role,
            node.host(),
            node.kubelet()
        )?;
    }
    Ok(out)
}
