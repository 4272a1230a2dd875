//! Resolution results.

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ReasonCode};

/// The final status of a (golden path, target) pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// A single target path was chosen.
    Resolved,
    /// Several candidates remain tied.
    Ambiguous,
    /// No target path could be chosen.
    Unresolved,
    /// The path or the target netlist could not be processed.
    Error,
}

/// The stage that chose a resolved path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Signature comparison.
    Structural,
    /// Name and connectivity similarity.
    Fuzzy,
    /// The disambiguation transport.
    Llm,
}

/// A ranked alternative target path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The target path.
    pub path: ArcStr,
    /// The candidate's score in [0, 1].
    pub score: f64,
}

/// Why a pair is not resolved.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    /// The machine-readable reason.
    pub code: ReasonCode,
    /// A human-readable explanation.
    pub message: String,
}

impl Reason {
    /// Creates a new reason.
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&Error> for Reason {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// The outcome of resolving one golden path against one target netlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResolution {
    /// The target identifier.
    pub target: ArcStr,
    /// The final status.
    pub status: Status,
    /// The chosen target path, when resolved.
    pub resolved_path: Option<ArcStr>,
    /// The confidence in the chosen path; zero unless resolved.
    pub confidence: f64,
    /// The stage that chose the path, when resolved.
    pub method: Option<Method>,
    /// Ranked alternative candidates.
    pub candidates: Vec<Candidate>,
    /// Why the pair is not resolved.
    pub reason: Option<Reason>,
    /// The explanation given by the disambiguation transport, if it decided.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rationale: Option<String>,
}

impl TargetResolution {
    /// A resolved outcome.
    pub fn resolved(
        target: ArcStr,
        path: ArcStr,
        confidence: f64,
        method: Method,
        candidates: Vec<Candidate>,
    ) -> Self {
        Self {
            target,
            status: Status::Resolved,
            resolved_path: Some(path),
            confidence: confidence.clamp(0.0, 1.0),
            method: Some(method),
            candidates,
            reason: None,
            rationale: None,
        }
    }

    /// An outcome that did not resolve, with the given status.
    pub fn unsettled(
        target: ArcStr,
        status: Status,
        candidates: Vec<Candidate>,
        reason: Reason,
    ) -> Self {
        Self {
            target,
            status,
            resolved_path: None,
            confidence: 0.0,
            method: None,
            candidates,
            reason: Some(reason),
            rationale: None,
        }
    }

    /// An error outcome.
    pub fn error(target: ArcStr, err: &Error) -> Self {
        Self::unsettled(target, Status::Error, Vec::new(), Reason::from(err))
    }

    /// Attaches the disambiguation rationale.
    pub fn with_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale;
        self
    }
}

/// The outcomes of one golden path against every target, in target order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// The requested golden path.
    pub golden_path: String,
    /// One outcome per target.
    pub targets: Vec<TargetResolution>,
}

impl ResolutionResult {
    /// Returns `true` if any target ended in [`Status::Error`].
    pub fn has_error(&self) -> bool {
        self.targets.iter().any(|t| t.status == Status::Error)
    }
}

/// The full response to a resolution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    /// `false` if any pair ended in [`Status::Error`].
    pub success: bool,
    /// A summary of the outcome.
    pub message: String,
    /// One result per requested golden path, in request order.
    pub resolutions: Vec<ResolutionResult>,
    /// The subcircuits of the golden netlist.
    pub golden_subcircuits: Vec<ArcStr>,
    /// The subcircuits of every target netlist that could be parsed.
    pub target_subcircuits: IndexMap<ArcStr, Vec<ArcStr>>,
}
