use super::{EventNode, EventTree, NodeId, NodeKind};
use crate::description::{AltTarget, BranchSpec, Description, DurationSpec, EventSpec, IgnoreFlags};
use crate::error::{Result, TaskTimeError};
use log::debug;
use serde::{Deserialize, Serialize};

/// How a catch branch shares weight with the path that keeps going.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatchWeighting {
    /// Catch sibling weighs `p`, the continuing path keeps weight 1.
    #[default]
    Additive,
    /// Catch sibling weighs `p`, the continuing path weighs `1 - p`.
    Complementary,
}

struct TreeBuilder {
    tree: EventTree,
    weighting: CatchWeighting,
    catch_count: usize,
}

/// Build the event tree for every `|` group of a description.
pub fn build_tree(description: &Description, weighting: CatchWeighting) -> Result<EventTree> {
    let mut builder = TreeBuilder {
        tree: EventTree::with_root(),
        weighting,
        catch_count: 0,
    };
    let mut leaves = Vec::new();
    for chain in &description.groups {
        leaves.extend(builder.build_chain(chain)?);
    }
    if leaves.is_empty() {
        return Err(TaskTimeError::MalformedDescription(
            "description has no events".into(),
        ));
    }
    let mut tree = builder.tree;
    tree.finalize(leaves);
    debug!(
        "built tree: {} nodes, {} leaves",
        tree.nodes().len(),
        tree.leaves().len()
    );
    Ok(tree)
}

impl TreeBuilder {
    fn build_chain(&mut self, chain: &[EventSpec]) -> Result<Vec<NodeId>> {
        let mut frontier = vec![EventTree::ROOT];
        for event in chain {
            let parents = frontier;
            let open: Vec<NodeId> = parents
                .iter()
                .copied()
                .filter(|&p| !self.tree.node(p).terminal)
                .collect();
            let mut next: Vec<NodeId> = open
                .into_iter()
                .map(|parent| self.add_event(parent, event, 1.0, IgnoreFlags::default()))
                .collect();
            if let Some(branches) = &event.branches {
                next = self.expand(next, branches)?;
            }
            // closed paths ride along untouched
            next.extend(parents.iter().copied().filter(|&p| self.tree.node(p).terminal));

            if let Some(ratio) = event.catch_ratio.filter(|&r| r > 0.0) {
                let catches = self.add_catches(&next, ratio, &event.name)?;
                next.extend(catches);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    fn add_event(
        &mut self,
        parent: NodeId,
        event: &EventSpec,
        weight: f64,
        inherited: IgnoreFlags,
    ) -> NodeId {
        let duration = event.duration.clone().unwrap_or(DurationSpec::Fixed(0.0));
        let weight = weight * self.tree.node(parent).continue_weight;
        let mut node = EventNode::new(event.name.clone(), NodeKind::Event, duration, weight);
        node.model = event.model.clone();
        node.flags = event.flags.merge(inherited);
        self.tree.add_child(parent, node)
    }

    fn add_label(&mut self, parent: NodeId, name: &str, weight: f64, flags: IgnoreFlags) -> NodeId {
        let weight = weight * self.tree.node(parent).continue_weight;
        let mut node = EventNode::new(name, NodeKind::Event, DurationSpec::Fixed(0.0), weight);
        node.flags = flags;
        self.tree.add_child(parent, node)
    }

    /// Fan `parents` out over a branch specification, returning the new open
    /// nodes. Alternatives are the outer loop so siblings of one option stay
    /// together in discovery order.
    fn expand(&mut self, parents: Vec<NodeId>, spec: &BranchSpec) -> Result<Vec<NodeId>> {
        match spec {
            BranchSpec::Alternatives { options, flags } => {
                if options.is_empty() {
                    return Err(TaskTimeError::MalformedDescription(
                        "empty branch list".into(),
                    ));
                }
                let mut children = Vec::with_capacity(options.len() * parents.len());
                for option in options {
                    let weight = option.freq.unwrap_or(1.0);
                    if weight <= 0.0 {
                        return Err(TaskTimeError::MalformedDescription(format!(
                            "branch '{}' has non-positive weight {}",
                            option.target.name(),
                            weight
                        )));
                    }
                    for &parent in &parents {
                        match &option.target {
                            AltTarget::Label(name) => {
                                children.push(self.add_label(parent, name, weight, *flags));
                            }
                            AltTarget::Event(event) => {
                                let id = self.add_event(parent, event, weight, *flags);
                                match &event.branches {
                                    Some(nested) => children.extend(self.expand(vec![id], nested)?),
                                    None => children.push(id),
                                }
                            }
                        }
                    }
                }
                Ok(children)
            }
            BranchSpec::CrossProduct(factors) => {
                let mut current = parents;
                for factor in factors {
                    current = self.expand(current, factor)?;
                }
                Ok(current)
            }
        }
    }

    fn add_catches(&mut self, open: &[NodeId], ratio: f64, after: &str) -> Result<Vec<NodeId>> {
        if self.weighting == CatchWeighting::Complementary && ratio >= 1.0 {
            return Err(TaskTimeError::MalformedDescription(format!(
                "catch ratio {} after '{}' leaves nothing to continue",
                ratio, after
            )));
        }
        self.catch_count += 1;
        let name = format!("__catch__{}", self.catch_count);
        let open: Vec<NodeId> = open
            .iter()
            .copied()
            .filter(|&p| !self.tree.node(p).terminal)
            .collect();
        let mut catches = Vec::new();
        for parent in open {
            let mut node = EventNode::new(name.clone(), NodeKind::Catch, DurationSpec::Fixed(0.0), ratio);
            node.terminal = true;
            catches.push(self.tree.add_child(parent, node));
            if self.weighting == CatchWeighting::Complementary {
                self.tree.node_mut(parent).continue_weight = 1.0 - ratio;
            }
        }
        debug!("{}: {} catch leaves ({})", after, catches.len(), name);
        Ok(catches)
    }
}
