//! Signature-based candidate search.

use hiergraph::{HierarchyGraph, NodeId};

/// The target nodes sharing a golden node's signature.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StructuralMatch {
    /// No target node shares the signature.
    None,
    /// Exactly one target node shares the signature.
    Unique(NodeId),
    /// Several target nodes share the signature, in depth-first preorder.
    Tied(Vec<NodeId>),
}

impl StructuralMatch {
    /// The matched nodes.
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            Self::None => &[],
            Self::Unique(id) => std::slice::from_ref(id),
            Self::Tied(ids) => ids,
        }
    }

    fn from_nodes(mut ids: Vec<NodeId>) -> Self {
        match ids.len() {
            0 => Self::None,
            1 => Self::Unique(ids.remove(0)),
            _ => Self::Tied(ids),
        }
    }
}

/// Finds the target nodes whose signature equals that of golden node `id`.
///
/// Ties are narrowed to the children of the parent's match when the golden parent
/// itself matches uniquely, then to the candidate with the golden node's exact path.
/// Narrowing never removes every candidate.
pub fn match_node(golden: &HierarchyGraph, id: NodeId, target: &HierarchyGraph) -> StructuralMatch {
    let node = golden.node(id);
    let mut found = target.with_signature(&node.signature().key).to_vec();
    if found.len() < 2 {
        return StructuralMatch::from_nodes(found);
    }

    if let Some(parent) = node.parent() {
        if let StructuralMatch::Unique(tp) = match_node(golden, parent, target) {
            narrow(&mut found, |c| target.node(c).parent() == Some(tp));
        }
    }
    if found.len() > 1 {
        narrow(&mut found, |c| target.node(c).path() == node.path());
    }
    StructuralMatch::from_nodes(found)
}

fn narrow(found: &mut Vec<NodeId>, keep: impl Fn(NodeId) -> bool) {
    let kept: Vec<NodeId> = found.iter().copied().filter(|&c| keep(c)).collect();
    if !kept.is_empty() {
        *found = kept;
    }
}

/// The target nodes worth ranking when golden node `id` has no structural match.
///
/// These are the children of whatever the golden parent matches; failing that, every
/// target node.
pub fn pool(golden: &HierarchyGraph, id: NodeId, target: &HierarchyGraph) -> Vec<NodeId> {
    if let Some(parent) = golden.node(id).parent() {
        let children: Vec<NodeId> = match_node(golden, parent, target)
            .nodes()
            .iter()
            .flat_map(|&p| target.node(p).children().iter().copied())
            .collect();
        if !children.is_empty() {
            return children;
        }
    }
    target.nodes().map(|n| n.id()).collect()
}
