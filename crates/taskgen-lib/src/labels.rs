//! Stimulus labels handed to the modelling tool.

use crate::description::Glt;
use crate::tree::{EventTree, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimLabel {
    pub name: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StimLabels {
    pub stims: Vec<StimLabel>,
    /// Header contrasts followed by one `parent = a+b` contrast per parent of
    /// zero-duration labels.
    pub glts: Vec<Glt>,
}

/// Distinct modelled stimuli of a tree, one per master.
///
/// A zero-duration label is named after its parent (`cue_A`) and inherits the
/// parent's model when it has none of its own.
pub fn stim_labels(tree: &EventTree, header_glts: &[Glt]) -> StimLabels {
    let mut stims = Vec::new();
    let mut seen = HashSet::new();
    let mut parent_glts: Vec<(String, Vec<String>)> = Vec::new();

    for &master in tree.masters() {
        let node = tree.node(master);
        if node.kind != NodeKind::Event || node.flags.model || node.flags.timing {
            continue;
        }
        let parent = node
            .parent
            .map(|p| tree.node(p))
            .filter(|p| p.kind == NodeKind::Event);
        let (name, model) = match parent {
            Some(parent) if node.is_label() => {
                let name = format!("{}_{}", parent.name, node.name);
                match parent_glts.iter_mut().find(|(p, _)| *p == parent.name) {
                    Some((_, members)) => members.push(name.clone()),
                    None => parent_glts.push((parent.name.clone(), vec![name.clone()])),
                }
                (name, node.model.clone().or_else(|| parent.model.clone()))
            }
            _ => (node.name.clone(), node.model.clone()),
        };
        if seen.insert(name.clone()) {
            stims.push(StimLabel { name, model });
        }
    }

    let mut glts = header_glts.to_vec();
    glts.extend(parent_glts.into_iter().map(|(name, members)| Glt {
        name,
        formula: members.join("+"),
    }));
    StimLabels { stims, glts }
}
