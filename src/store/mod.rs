//! Per-profile node records and their persistence.
//!
//! [`NodeStore`] holds the membership of one cluster: the ordered node list,
//! the names retired by deletions, and the next ordinal to hand out. It is
//! also the only place node names are generated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::driver::ProvisionOptions;
use crate::node::{Node, NodeName, NodeRole, NodeState, machine_name};

mod persist;
mod registry;

pub use persist::{FileProfileStore, ProfileStore, ProfileStoreError, is_valid_profile_name};
pub use registry::{ProfileGuard, ProfileRegistry};

/// Lifecycle phase of a profile.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfilePhase {
    /// Normal operation.
    #[default]
    Active,
    /// Cluster deletion has started and not yet finished.
    TearingDown,
}

/// Result of resolving a user-supplied node reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeLookup {
    /// The reference names an active node.
    Active(Node),
    /// The reference names a node that has been deleted.
    Retired(NodeName),
    /// Nothing in this profile matches.
    Unknown,
}

/// Membership record of a single cluster profile.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeStore {
    profile: String,
    options: ProvisionOptions,
    nodes: Vec<Node>,
    retired: BTreeSet<NodeName>,
    next_ordinal: u32,
    #[serde(default)]
    phase: ProfilePhase,
}

impl NodeStore {
    /// Creates an empty record for `profile`.
    #[must_use]
    pub fn new(profile: impl Into<String>, options: ProvisionOptions) -> Self {
        Self {
            profile: profile.into(),
            options,
            nodes: Vec::new(),
            retired: BTreeSet::new(),
            next_ordinal: 1,
            phase: ProfilePhase::Active,
        }
    }

    /// Profile name.
    #[must_use]
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Provisioning options the cluster was created with.
    #[must_use]
    pub const fn options(&self) -> &ProvisionOptions {
        &self.options
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> ProfilePhase {
        self.phase
    }

    /// Moves the profile to another lifecycle phase.
    pub const fn set_phase(&mut self, phase: ProfilePhase) {
        self.phase = phase;
    }

    /// Active nodes in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of active nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no node is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names retired by deletions.
    pub fn retired(&self) -> impl Iterator<Item = &NodeName> {
        self.retired.iter()
    }

    /// Appends a node with the next ordinal and returns a copy of it.
    ///
    /// Ordinals only grow, so a retired name is never handed out again.
    pub fn allocate(&mut self) -> Node {
        let ordinal = self.next_ordinal;
        self.next_ordinal = self.next_ordinal.saturating_add(1);
        let node = Node {
            name: NodeName::for_ordinal(ordinal),
            ordinal,
            role: NodeRole::for_ordinal(ordinal),
            state: NodeState::Down,
        };
        self.nodes.push(node.clone());
        node
    }

    /// Finds an active node by node name or machine name.
    #[must_use]
    pub fn node(&self, reference: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| {
            node.name.as_str() == reference || node.machine_name(&self.profile) == reference
        })
    }

    /// Resolves a node reference, distinguishing retired names.
    #[must_use]
    pub fn lookup(&self, reference: &str) -> NodeLookup {
        if let Some(node) = self.node(reference) {
            return NodeLookup::Active(node.clone());
        }
        self.retired
            .iter()
            .find(|name| {
                name.as_str() == reference
                    || machine_name(&self.profile, name, NodeRole::Worker) == reference
            })
            .map_or(NodeLookup::Unknown, |name| {
                NodeLookup::Retired(name.clone())
            })
    }

    /// Records a new state for the named node. Returns `false` when the node
    /// is not active.
    pub fn set_state(&mut self, name: &NodeName, state: NodeState) -> bool {
        match self.nodes.iter_mut().find(|node| &node.name == name) {
            Some(node) => {
                node.state = state;
                true
            }
            None => false,
        }
    }

    /// Removes the named node from the active list and retires its name.
    pub fn retire(&mut self, name: &NodeName) -> Option<Node> {
        let index = self.nodes.iter().position(|node| &node.name == name)?;
        let node = self.nodes.remove(index);
        self.retired.insert(node.name.clone());
        Some(node)
    }
}
