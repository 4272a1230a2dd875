//! Resolution of one golden path against one target netlist.

use std::sync::Arc;

use arcstr::ArcStr;
use hiergraph::{HierarchyGraph, NodeId};
use tokio_util::sync::CancellationToken;

use crate::config::MatchOptions;
use crate::error::{Error, ReasonCode, Result};
use crate::escalate::{Decision, DisambiguationTransport, Escalator, NodeSummary, Outcome};
use crate::fuzzy;
use crate::machine::{Event, Machine};
use crate::nets;
use crate::result::{Candidate, Method, Reason, Status, TargetResolution};
use crate::structural::{self, StructuralMatch};

/// A golden path located in the golden hierarchy.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GoldenRef {
    /// The path names an instance.
    Node(NodeId),
    /// The path names a net of an instance's master.
    Net(NodeId, ArcStr),
}

impl GoldenRef {
    /// Locates `path` in `graph`, as an instance first and then as a net.
    pub fn find(graph: &HierarchyGraph, path: &str) -> Option<Self> {
        graph
            .find(path)
            .map(Self::Node)
            .or_else(|| graph.find_net(path).map(|(id, net)| Self::Net(id, net)))
    }

    fn node(&self) -> NodeId {
        match self {
            Self::Node(id) | Self::Net(id, _) => *id,
        }
    }
}

/// Everything needed to resolve a pair, shareable across tasks.
#[derive(Clone)]
pub struct Pair {
    /// The golden hierarchy.
    pub golden: Arc<HierarchyGraph>,
    /// The target hierarchy.
    pub target: Arc<HierarchyGraph>,
    /// The target identifier.
    pub target_name: ArcStr,
    /// The options in effect.
    pub opts: Arc<MatchOptions>,
    /// The disambiguation transport, if one is configured.
    pub transport: Option<Arc<dyn DisambiguationTransport>>,
    /// Cancels the resolution.
    pub cancel: CancellationToken,
}

impl Pair {
    /// Resolves `golden` in the target hierarchy.
    ///
    /// Only cancellation is returned as an error; every other failure becomes an
    /// [`Status::Error`] outcome.
    pub async fn resolve(&self, golden: &GoldenRef) -> Result<TargetResolution> {
        let mut machine = Machine::new(
            self.opts.max_validation_retries,
            self.opts.max_transport_retries,
        );
        let resolved = match self.resolve_node(&mut machine, golden.node()).await {
            Ok(resolved) => resolved,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                let _ = machine.apply(Event::Failed);
                tracing::error!("resolution failed: {err}");
                return Ok(TargetResolution::error(self.target_name.clone(), &err));
            }
        };
        tracing::debug!(phase = %machine.phase(), "resolution finished");
        Ok(match golden {
            GoldenRef::Node(_) => resolved,
            GoldenRef::Net(id, net) => self.map_net(resolved, *id, net),
        })
    }

    async fn resolve_node(&self, machine: &mut Machine, id: NodeId) -> Result<TargetResolution> {
        let (golden, target) = (&*self.golden, &*self.target);

        let (event, pool) = match structural::match_node(golden, id, target) {
            StructuralMatch::Unique(tid) => {
                machine.apply(Event::StructuralUnique)?;
                let path = target.node(tid).path().clone();
                return Ok(TargetResolution::resolved(
                    self.target_name.clone(),
                    path.clone(),
                    1.0,
                    Method::Structural,
                    vec![Candidate { path, score: 1.0 }],
                ));
            }
            StructuralMatch::Tied(ids) => (Event::StructuralTied, ids),
            StructuralMatch::None => (Event::StructuralNone, structural::pool(golden, id, target)),
        };
        machine.apply(event)?;
        let tied = event == Event::StructuralTied;

        let mut ranked = fuzzy::rank(golden, id, target, &pool);
        if ranked.is_empty() {
            machine.apply(Event::EscalationUnavailable { tied: false })?;
            return Ok(self.unsettled(
                Status::Unresolved,
                Vec::new(),
                Reason::new(ReasonCode::NoCandidates, "the target netlist has no instances"),
            ));
        }
        if let Some(best) = fuzzy::accept(
            &ranked,
            self.opts.acceptance_threshold,
            self.opts.tie_margin,
        ) {
            machine.apply(Event::FuzzyAccepted)?;
            let (path, score) = (best.path.clone(), best.score);
            ranked.truncate(self.opts.max_llm_candidates);
            return Ok(TargetResolution::resolved(
                self.target_name.clone(),
                path,
                score,
                Method::Fuzzy,
                ranked,
            ));
        }
        machine.apply(Event::FuzzyUndecided)?;
        ranked.truncate(self.opts.max_llm_candidates);

        let Some(transport) = self.transport.as_deref() else {
            machine.apply(Event::EscalationUnavailable { tied })?;
            let (status, message) = if tied {
                (
                    Status::Ambiguous,
                    format!(
                        "{} candidates share the golden signature and no disambiguation transport is configured",
                        pool.len()
                    ),
                )
            } else {
                (
                    Status::Unresolved,
                    "no candidate shares the golden signature and no disambiguation transport is configured"
                        .to_string(),
                )
            };
            return Ok(self.unsettled(
                status,
                ranked,
                Reason::new(ReasonCode::DisambiguationUnavailable, message),
            ));
        };

        let summary = NodeSummary::of(golden, id, None);
        let offered = ranked
            .iter()
            .filter_map(|c| {
                target
                    .find(&c.path)
                    .map(|tid| NodeSummary::of(target, tid, Some(c.score)))
            })
            .collect();
        let outcome = Escalator::new(transport, &self.opts, &self.cancel)
            .resolve(machine, summary, offered)
            .await?;

        Ok(match outcome {
            Outcome::Decided(Decision::Match {
                path,
                reason,
                confidence,
            }) => TargetResolution::resolved(
                self.target_name.clone(),
                path,
                confidence,
                Method::Llm,
                ranked,
            )
            .with_rationale(Some(reason)),
            Outcome::Decided(Decision::NoMatch { reason }) => self
                .unsettled(
                    Status::Unresolved,
                    ranked,
                    Reason::new(ReasonCode::NoMatch, reason.clone()),
                )
                .with_rationale(Some(reason)),
            Outcome::Decided(Decision::Tie { paths, reason }) => {
                let tied = ranked
                    .into_iter()
                    .filter(|c| paths.contains(&c.path))
                    .collect();
                let err = Error::AmbiguousMatch {
                    count: paths.len(),
                    reason: reason.clone(),
                };
                self.unsettled(Status::Ambiguous, tied, Reason::from(&err))
                    .with_rationale(Some(reason))
            }
            Outcome::ValidationExhausted {
                attempts,
                last_error,
            } => {
                let err = Error::LlmValidation {
                    attempts,
                    last_error,
                };
                self.unsettled(Status::Unresolved, ranked, Reason::from(&err))
            }
            Outcome::TransportExhausted { attempts, message } => {
                let err = Error::LlmTransport { attempts, message };
                self.unsettled(Status::Unresolved, ranked, Reason::from(&err))
            }
        })
    }

    /// Extends a resolved instance with the counterpart of a golden net.
    fn map_net(&self, mut resolved: TargetResolution, id: NodeId, net: &ArcStr) -> TargetResolution {
        let (golden, target) = (&*self.golden, &*self.target);
        let sep = target.separator();
        let with_net = |path: &ArcStr| -> Option<(ArcStr, f64)> {
            let tid = target.find(path)?;
            let m = nets::map_net(golden, id, net, target, tid)?;
            Some((arcstr::format!("{path}{sep}{}", m.net), m.score))
        };

        resolved.candidates = resolved
            .candidates
            .iter()
            .filter_map(|c| {
                with_net(&c.path).map(|(path, score)| Candidate {
                    path,
                    score: c.score * score,
                })
            })
            .collect();

        let Some(path) = resolved.resolved_path.take() else {
            return resolved;
        };
        match with_net(&path) {
            Some((net_path, score)) => {
                resolved.resolved_path = Some(net_path);
                resolved.confidence *= score;
                resolved
            }
            None => TargetResolution {
                status: Status::Unresolved,
                confidence: 0.0,
                method: None,
                reason: Some(Reason::new(
                    ReasonCode::NoCandidates,
                    format!("net `{net}` has no counterpart in `{path}`"),
                )),
                ..resolved
            },
        }
    }

    fn unsettled(&self, status: Status, candidates: Vec<Candidate>, reason: Reason) -> TargetResolution {
        TargetResolution::unsettled(self.target_name.clone(), status, candidates, reason)
    }
}
