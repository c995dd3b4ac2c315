//! Weighted event tree. Nodes live in one arena and refer to each other by
//! index; same-named nodes share a master found through a name map.

mod builder;

pub use builder::{build_tree, CatchWeighting};

use crate::description::{DurationSpec, IgnoreFlags};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    /// Synthetic anchor above every event group; never named or timed.
    Root,
    Event,
    /// Terminal sibling closing a trial early.
    Catch,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventNode {
    pub name: String,
    pub kind: NodeKind,
    pub duration: DurationSpec,
    /// Relative frequency among siblings ("nrep").
    pub weight: f64,
    /// Weight handed to the next event chained under this node. Below 1 only
    /// for complementary catch weighting.
    pub continue_weight: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub terminal: bool,
    pub model: Option<String>,
    pub flags: IgnoreFlags,

    /// Root-to-self chain, excluding the synthetic root.
    pub path: Vec<NodeId>,
    pub path_weight: f64,
    pub subtree_total: f64,
    pub master: NodeId,

    /// Rounded, normalised repeats per balanced pass (trial endpoints only).
    pub units: u64,
    /// Draws this node takes across one realization.
    pub visits: u64,
    /// Pool size owed by a master for all of its aliases.
    pub required_samples: u64,
}

impl EventNode {
    fn new(name: impl Into<String>, kind: NodeKind, duration: DurationSpec, weight: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            duration,
            weight,
            continue_weight: 1.0,
            parent: None,
            children: Vec::new(),
            terminal: false,
            model: None,
            flags: IgnoreFlags::default(),
            path: Vec::new(),
            path_weight: 1.0,
            subtree_total: 0.0,
            master: 0,
            units: 0,
            visits: 0,
            required_samples: 0,
        }
    }

    pub fn is_catch(&self) -> bool {
        self.kind == NodeKind::Catch
    }

    pub fn is_label(&self) -> bool {
        self.duration.is_zero()
    }
}

/// The built tree plus its trial endpoints ("leaves"), in discovery order.
///
/// An endpoint is normally a childless node. A node followed only by catch
/// children still closes its own non-catch condition and is an endpoint too.
#[derive(Debug, Clone, Serialize)]
pub struct EventTree {
    nodes: Vec<EventNode>,
    leaves: Vec<NodeId>,
    masters: Vec<NodeId>,
}

impl EventTree {
    fn with_root() -> Self {
        let mut root = EventNode::new("__root__", NodeKind::Root, DurationSpec::Fixed(0.0), 1.0);
        root.subtree_total = 1.0;
        Self {
            nodes: vec![root],
            leaves: Vec::new(),
            masters: Vec::new(),
        }
    }

    pub const ROOT: NodeId = 0;

    pub fn node(&self, id: NodeId) -> &EventNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut EventNode {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[EventNode] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    /// One representative per distinct name, in discovery order.
    pub fn masters(&self) -> &[NodeId] {
        &self.masters
    }

    pub fn master_of(&self, id: NodeId) -> &EventNode {
        &self.nodes[self.nodes[id].master]
    }

    pub fn leaf_weight(&self, leaf: NodeId) -> f64 {
        let node = &self.nodes[leaf];
        node.path_weight * node.continue_weight
    }

    fn add_child(&mut self, parent: NodeId, mut node: EventNode) -> NodeId {
        let id = self.nodes.len();
        node.parent = Some(parent);
        node.master = id;
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        id
    }

    /// Cache root paths and path weights top-down, subtree totals bottom-up,
    /// and link every node to the master for its name.
    fn finalize(&mut self, leaves: Vec<NodeId>) {
        self.leaves = leaves;
        // children are always pushed after their parent
        for id in 1..self.nodes.len() {
            let parent = self.nodes[id].parent.unwrap_or(Self::ROOT);
            let (mut path, parent_weight) = if parent == Self::ROOT {
                (Vec::new(), 1.0)
            } else {
                (self.nodes[parent].path.clone(), self.nodes[parent].path_weight)
            };
            path.push(id);
            let node = &mut self.nodes[id];
            node.path_weight = parent_weight * node.weight;
            node.path = path;
        }
        self.recount_totals();

        let mut by_name: HashMap<String, NodeId> = HashMap::new();
        self.masters.clear();
        for id in 1..self.nodes.len() {
            let master = *by_name.entry(self.nodes[id].name.clone()).or_insert_with(|| {
                self.masters.push(id);
                id
            });
            self.nodes[id].master = master;
        }
    }

    pub(crate) fn recount_totals(&mut self) {
        for id in (0..self.nodes.len()).rev() {
            let node = &self.nodes[id];
            let total = if node.children.is_empty() {
                node.weight
            } else {
                node.weight
                    * node
                        .children
                        .iter()
                        .map(|&c| self.nodes[c].subtree_total)
                        .sum::<f64>()
            };
            self.nodes[id].subtree_total = total;
        }
    }

    /// Compound names of every endpoint, e.g. `cue_A_end`.
    pub fn leaf_names(&self) -> Vec<String> {
        self.leaves
            .iter()
            .map(|&leaf| {
                self.nodes[leaf]
                    .path
                    .iter()
                    .map(|&id| self.nodes[id].name.as_str())
                    .collect::<Vec<_>>()
                    .join("_")
            })
            .collect()
    }

    /// Indented text rendering used by dry runs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for &child in &self.nodes[Self::ROOT].children {
            self.render_node(child, 0, &mut out);
        }
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let _ = writeln!(
            out,
            "{}{} {:?} x{} (path {:.3}, total {:.3}{})",
            "  ".repeat(depth),
            node.name,
            node.duration,
            node.weight,
            node.path_weight,
            node.subtree_total,
            if node.terminal { ", terminal" } else { "" }
        );
        for &child in &node.children {
            self.render_node(child, depth + 1, out);
        }
    }
}
