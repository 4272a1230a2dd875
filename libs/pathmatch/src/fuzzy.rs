//! Name and connectivity similarity ranking.

use std::cmp::Ordering;

use hiergraph::{HierarchyGraph, NodeId};

use crate::result::Candidate;

const NAME_WEIGHT: f64 = 0.6;
const PORT_WEIGHT: f64 = 0.4;

/// Normalized edit-distance similarity of two names, ignoring case.
///
/// Returns 1 for identical names and 0 for names with nothing in common.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let subst = prev[j] + usize::from(ca != cb);
            cur[j + 1] = subst.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Similarity of two instance paths, level by level from the leaf up.
///
/// Levels present in only one path score zero.
pub fn path_similarity<A: AsRef<str>, B: AsRef<str>>(golden: &[A], target: &[B]) -> f64 {
    let levels = golden.len().max(target.len());
    if levels == 0 {
        return 1.0;
    }
    let total: f64 = golden
        .iter()
        .rev()
        .zip(target.iter().rev())
        .map(|(g, t)| name_similarity(g.as_ref(), t.as_ref()))
        .sum();
    total / levels as f64
}

/// The fraction of connection positions whose net names agree, ignoring case.
///
/// [`None`] if neither side has connections.
pub fn port_similarity<A: AsRef<str>, B: AsRef<str>>(golden: &[A], target: &[B]) -> Option<f64> {
    let longest = golden.len().max(target.len());
    if longest == 0 {
        return None;
    }
    let same = golden
        .iter()
        .zip(target)
        .filter(|(g, t)| {
            let (g, t): (&str, &str) = (g.as_ref(), t.as_ref());
            g.eq_ignore_ascii_case(t)
        })
        .count();
    Some(same as f64 / longest as f64)
}

/// Scores target node `candidate` against golden node `id`.
pub fn score(
    golden: &HierarchyGraph,
    id: NodeId,
    target: &HierarchyGraph,
    candidate: NodeId,
) -> f64 {
    let names = path_similarity(&golden.segments(id), &target.segments(candidate));
    let ports = port_similarity(
        &golden.node(id).instance().connections,
        &target.node(candidate).instance().connections,
    );
    match ports {
        Some(ports) => NAME_WEIGHT * names + PORT_WEIGHT * ports,
        None => names,
    }
}

/// Ranks `candidates` by decreasing score, breaking equal scores by path.
pub fn rank(
    golden: &HierarchyGraph,
    id: NodeId,
    target: &HierarchyGraph,
    candidates: &[NodeId],
) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = candidates
        .iter()
        .map(|&c| Candidate {
            path: target.node(c).path().clone(),
            score: score(golden, id, target, c),
        })
        .collect();
    ranked.sort_by(compare);
    ranked
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path))
}

/// Picks the best candidate if it clears `threshold` and leads the runner-up by `margin`.
pub fn accept(ranked: &[Candidate], threshold: f64, margin: f64) -> Option<&Candidate> {
    let best = ranked.first()?;
    if best.score <= threshold {
        return None;
    }
    match ranked.get(1) {
        Some(next) if best.score - next.score < margin - 1e-9 => None,
        _ => Some(best),
    }
}
