//! Disambiguation through an external decision maker.
//!
//! When neither signatures nor similarity single out one candidate, the golden node
//! and the remaining candidates are summarized and sent to a
//! [`DisambiguationTransport`]. The response must satisfy a fixed contract: a JSON
//! object that either names exactly one of the offered paths or declares that none
//! matches. Invalid responses are re-prompted with the validation error as feedback.

use std::time::Duration;

use arcstr::ArcStr;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use hiergraph::{HierarchyGraph, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::MatchOptions;
use crate::error::{Error, Result};
use crate::machine::{Event, Machine, Phase, Verdict};

pub mod http;

#[cfg(test)]
mod tests;

const SYSTEM_PROMPT: &str = "You are an expert at matching hierarchical instance paths between \
SPICE and Spectre netlists. Instance names may be renamed between netlists while the circuit \
topology, subcircuit masters and port connections are preserved. Choose the candidate that \
corresponds to the golden instance, or say that none does. Never guess: if several candidates \
are equally plausible, report them as tied. Respond with a single JSON object and nothing else.";

/// A local summary of one hierarchy node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    /// The full path.
    pub path: ArcStr,
    /// The master the node instantiates.
    pub master: String,
    /// The masters of the node's ancestors, from the root down.
    pub ancestors: Vec<String>,
    /// The nets connected to the node, in port order.
    pub connections: Vec<ArcStr>,
    /// The ports of the node's master, if it is a subcircuit.
    pub ports: Vec<ArcStr>,
    /// The other instances sharing the node's parent, as `name (master)`.
    pub siblings: Vec<String>,
    /// The node's child instances, as `name (master)`.
    pub children: Vec<String>,
    /// The position of the node among siblings sharing its master.
    pub sibling_ordinal: usize,
    /// The similarity score of a candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl NodeSummary {
    /// Summarizes node `id` of `graph`.
    pub fn of(graph: &HierarchyGraph, id: NodeId, score: Option<f64>) -> Self {
        let node = graph.node(id);
        let describe = |n: NodeId| {
            let inst = graph.node(n).instance();
            format!("{} ({})", inst.name, inst.master)
        };
        let signature = node.signature();
        Self {
            path: node.path().clone(),
            master: node.instance().master.to_string(),
            ancestors: signature
                .key
                .ancestors
                .iter()
                .map(ToString::to_string)
                .collect(),
            connections: node.instance().connections.clone(),
            ports: graph
                .definition(id)
                .map(|d| d.ports.clone())
                .unwrap_or_default(),
            siblings: graph.siblings(id).map(describe).collect(),
            children: node.children().iter().map(|&c| describe(c)).collect(),
            sibling_ordinal: signature.sibling_ordinal,
            score,
        }
    }
}

/// A request sent to a [`DisambiguationTransport`].
#[derive(Debug, Clone, Serialize)]
pub struct DisambiguationRequest {
    /// The model to ask.
    pub model: String,
    /// The golden node.
    pub golden: NodeSummary,
    /// The offered candidates, best ranked first.
    pub candidates: Vec<NodeSummary>,
    /// The 1-based attempt number.
    pub attempt: usize,
    /// Why the previous response was rejected.
    pub feedback: Option<String>,
}

impl DisambiguationRequest {
    /// The system prompt.
    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    /// The user prompt describing the golden node, the candidates and the response contract.
    pub fn user_prompt(&self) -> String {
        let golden = serde_json::to_string_pretty(&self.golden).unwrap_or_default();
        let candidates = serde_json::to_string_pretty(&self.candidates).unwrap_or_default();
        let mut prompt = format!(
            "## Golden instance\n```json\n{golden}\n```\n\n\
             ## Candidate target instances\n```json\n{candidates}\n```\n\n\
             Decide which candidate corresponds to the golden instance. Compare masters, \
             ancestor chains, port connections, siblings and children.\n\n\
             Respond with exactly one JSON object of one of these forms:\n\
             {{\"decision\": \"match\", \"path\": \"<one candidate path>\", \"reason\": \"<why>\", \"confidence\": <0 to 1>}}\n\
             {{\"decision\": \"no_match\", \"reason\": \"<why>\", \"tied\": [\"<candidate path>\", ...]}}\n\n\
             `path` must be copied exactly from the candidates. List `tied` only when two or \
             more candidates are equally good.\n"
        );
        if let Some(feedback) = &self.feedback {
            prompt.push_str(&format!(
                "\nYour previous response was rejected: {feedback}\nRespond again following the format exactly.\n"
            ));
        }
        prompt
    }
}

/// A transport failure.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Whether the failure is worth retrying.
    pub retryable: bool,
    /// A description of the failure.
    pub message: String,
}

impl TransportError {
    /// A failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// A failure not worth retrying.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Sends disambiguation requests to an external decision maker.
#[async_trait]
pub trait DisambiguationTransport: Send + Sync {
    /// Submits a request, returning the raw response text.
    async fn submit(
        &self,
        request: &DisambiguationRequest,
    ) -> std::result::Result<String, TransportError>;
}

/// A response that violates the response contract.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{0}")]
pub struct InvalidResponse(pub String);

#[derive(Debug, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
enum RawDecision {
    Match {
        path: String,
        reason: String,
        #[serde(default)]
        confidence: Option<f64>,
    },
    NoMatch {
        reason: String,
        #[serde(default)]
        tied: Vec<String>,
    },
}

/// A validated disambiguation decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// One offered candidate matches.
    Match {
        /// The chosen candidate path, as offered.
        path: ArcStr,
        /// Why it was chosen.
        reason: String,
        /// The reported confidence; 0.5 if none was reported.
        confidence: f64,
    },
    /// No offered candidate matches.
    NoMatch {
        /// Why nothing matches.
        reason: String,
    },
    /// Several offered candidates are equally good.
    Tie {
        /// The tied candidate paths, as offered.
        paths: Vec<ArcStr>,
        /// Why they could not be separated.
        reason: String,
    },
}

impl Decision {
    /// The state machine verdict for this decision.
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Match { .. } => Verdict::Match,
            Self::NoMatch { .. } => Verdict::NoMatch,
            Self::Tie { .. } => Verdict::Tie,
        }
    }

    /// The explanation given with the decision.
    pub fn reason(&self) -> &str {
        match self {
            Self::Match { reason, .. } | Self::NoMatch { reason } | Self::Tie { reason, .. } => {
                reason
            }
        }
    }
}

/// Returns the first balanced JSON object in `text`.
///
/// Braces inside JSON strings are ignored.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn offered_path(path: &str, offered: &[ArcStr]) -> std::result::Result<ArcStr, InvalidResponse> {
    let path = path.trim();
    if let Some(p) = offered.iter().find(|p| p.as_str() == path) {
        return Ok(p.clone());
    }
    let mut folded = offered.iter().filter(|p| p.eq_ignore_ascii_case(path));
    match (folded.next(), folded.next()) {
        (Some(p), None) => Ok(p.clone()),
        _ => Err(InvalidResponse(format!(
            "`{path}` is not one of the offered candidates"
        ))),
    }
}

/// Checks a raw response against the response contract.
pub fn validate(text: &str, offered: &[ArcStr]) -> std::result::Result<Decision, InvalidResponse> {
    let json = extract_json(text)
        .ok_or_else(|| InvalidResponse("response contains no JSON object".into()))?;
    let raw: RawDecision = serde_json::from_str(json)
        .map_err(|e| InvalidResponse(format!("response does not follow the format: {e}")))?;

    let reason = match &raw {
        RawDecision::Match { reason, .. } | RawDecision::NoMatch { reason, .. } => reason.trim(),
    };
    if reason.is_empty() {
        return Err(InvalidResponse("`reason` must not be empty".into()));
    }
    let reason = reason.to_string();

    match raw {
        RawDecision::Match {
            path, confidence, ..
        } => {
            let path = offered_path(&path, offered)?;
            let confidence = confidence.unwrap_or(0.5);
            if !(0.0..=1.0).contains(&confidence) {
                return Err(InvalidResponse(format!(
                    "`confidence` must lie in [0, 1], got {confidence}"
                )));
            }
            Ok(Decision::Match {
                path,
                reason,
                confidence,
            })
        }
        RawDecision::NoMatch { tied, .. } if tied.is_empty() => Ok(Decision::NoMatch { reason }),
        RawDecision::NoMatch { tied, .. } => {
            let mut paths: Vec<ArcStr> = Vec::new();
            for p in tied.iter() {
                let p = offered_path(p, offered)?;
                if !paths.contains(&p) {
                    paths.push(p);
                }
            }
            if paths.len() < 2 {
                return Err(InvalidResponse(
                    "`tied` must list at least two distinct candidates".into(),
                ));
            }
            Ok(Decision::Tie { paths, reason })
        }
    }
}

/// How an escalation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A valid decision was received.
    Decided(Decision),
    /// Every response was invalid.
    ValidationExhausted {
        /// The number of requests sent.
        attempts: usize,
        /// The last validation failure.
        last_error: String,
    },
    /// The transport kept failing.
    TransportExhausted {
        /// The number of requests sent.
        attempts: usize,
        /// The last transport failure.
        message: String,
    },
}

/// Drives disambiguation requests for one (golden path, target) pair.
pub struct Escalator<'a> {
    transport: &'a dyn DisambiguationTransport,
    opts: &'a MatchOptions,
    cancel: &'a CancellationToken,
}

impl<'a> Escalator<'a> {
    /// Creates a new escalator.
    pub fn new(
        transport: &'a dyn DisambiguationTransport,
        opts: &'a MatchOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            opts,
            cancel,
        }
    }

    /// Asks the transport to choose among `candidates` until a valid decision arrives or a
    /// retry budget runs out.
    ///
    /// `machine` must be in [`Phase::Escalating`].
    pub async fn resolve(
        &self,
        machine: &mut Machine,
        golden: NodeSummary,
        candidates: Vec<NodeSummary>,
    ) -> Result<Outcome> {
        let offered: Vec<ArcStr> = candidates.iter().map(|c| c.path.clone()).collect();
        let max_delay = Duration::from_millis(self.opts.backoff_max_ms);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.opts.backoff_initial_ms))
            .with_max_interval(max_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        let mut request = DisambiguationRequest {
            model: self.opts.model.clone(),
            golden,
            candidates,
            attempt: 0,
            feedback: None,
        };

        loop {
            machine.begin_request();
            request.attempt = machine.requests();
            tracing::debug!(
                golden = %request.golden.path,
                candidates = request.candidates.len(),
                attempt = request.attempt,
                "requesting disambiguation"
            );

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                sent = tokio::time::timeout(self.opts.call_timeout(), self.transport.submit(&request)) => sent,
            };
            let response = match sent {
                Ok(response) => response,
                Err(_) => Err(TransportError::retryable(format!(
                    "no response within {}s",
                    self.opts.call_timeout_secs
                ))),
            };

            let text = match response {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(retryable = err.retryable, "disambiguation transport failed: {err}");
                    let next = machine.apply(Event::TransportFailed {
                        retryable: err.retryable,
                    })?;
                    if next != Phase::Escalating {
                        return Ok(Outcome::TransportExhausted {
                            attempts: machine.requests(),
                            message: err.message,
                        });
                    }
                    let delay = backoff.next_backoff().unwrap_or(max_delay);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            machine.apply(Event::ResponseReceived)?;
            match validate(&text, &offered) {
                Ok(decision) => {
                    machine.apply(Event::ResponseValid(decision.verdict()))?;
                    return Ok(Outcome::Decided(decision));
                }
                Err(err) => {
                    tracing::warn!("invalid disambiguation response: {err}");
                    if machine.apply(Event::ResponseInvalid)? != Phase::Escalating {
                        return Ok(Outcome::ValidationExhausted {
                            attempts: machine.requests(),
                            last_error: err.0,
                        });
                    }
                    request.feedback = Some(err.0);
                }
            }
        }
    }
}
