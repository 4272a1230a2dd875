//! Mapping net names between matched instances.

use arcstr::ArcStr;
use hiergraph::{HierarchyGraph, NodeId};

use crate::fuzzy::name_similarity;

/// A net of a target instance corresponding to a golden net.
#[derive(Debug, Clone, PartialEq)]
pub struct NetMatch {
    /// The target net name.
    pub net: ArcStr,
    /// How confident the mapping is, in [0, 1].
    pub score: f64,
}

/// Maps `net` of golden node `golden_owner` to a net of target node `target_owner`.
///
/// Ports map by position, then nets map by name, ignoring case. Otherwise the most
/// similarly named internal net is chosen. Returns [`None`] if either node is not a
/// subcircuit instance or the target definition has no candidate nets.
pub fn map_net(
    golden: &HierarchyGraph,
    golden_owner: NodeId,
    net: &str,
    target: &HierarchyGraph,
    target_owner: NodeId,
) -> Option<NetMatch> {
    let gdef = golden.definition(golden_owner)?;
    let tdef = target.definition(target_owner)?;

    if let Some(port) = gdef.port_index(net).and_then(|i| tdef.ports.get(i)) {
        return Some(NetMatch {
            net: port.clone(),
            score: 1.0,
        });
    }

    let nets = tdef.nets();
    if let Some(same) = nets.iter().find(|n| n.eq_ignore_ascii_case(net)) {
        return Some(NetMatch {
            net: same.clone(),
            score: 1.0,
        });
    }

    nets.into_iter()
        .filter(|n| tdef.port_index(n).is_none())
        .map(|n| {
            let score = name_similarity(net, &n);
            NetMatch { net: n, score }
        })
        .fold(None, |best: Option<NetMatch>, m| match best {
            Some(b) if b.score >= m.score => Some(b),
            _ => Some(m),
        })
}
