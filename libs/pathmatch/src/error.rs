//! Resolution error types.

use std::path::PathBuf;
use std::sync::Arc;

use arcstr::ArcStr;
use hiergraph::BuildError;
use netlist::ParserError;
use serde::{Deserialize, Serialize};

use crate::machine::TransitionError;

/// A resolution result.
pub type Result<T> = std::result::Result<T, Error>;

/// A result whose error may be shared between concurrent waiters.
pub type ArcResult<T> = std::result::Result<T, Arc<Error>>;

/// An error arising while resolving hierarchy paths.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A netlist is malformed.
    #[error("{path:?}, line {line}: {reason}")]
    Parse {
        /// The netlist file.
        path: PathBuf,
        /// The line on which the offending statement starts.
        line: usize,
        /// Why the statement is malformed.
        reason: String,
    },
    /// An instance references a subcircuit that is never defined.
    #[error("{path:?}: instance `{instance}` references undefined subcircuit `{master}`")]
    UndefinedReference {
        /// The netlist file.
        path: PathBuf,
        /// The instance name.
        instance: ArcStr,
        /// The missing subcircuit.
        master: ArcStr,
    },
    /// A subcircuit transitively instantiates itself.
    #[error("{path:?}: {source}")]
    CyclicHierarchy {
        /// The netlist file.
        path: PathBuf,
        /// The underlying error.
        source: BuildError,
    },
    /// The hierarchy of a netlist could not be built.
    #[error("{path:?}: {source}")]
    Graph {
        /// The netlist file.
        path: PathBuf,
        /// The underlying error.
        source: BuildError,
    },
    /// A golden path names no node of the golden hierarchy.
    #[error("path `{0}` does not exist in the golden netlist")]
    PathNotFound(String),
    /// No single best candidate remains after every stage.
    #[error("{count} candidates remain tied: {reason}")]
    AmbiguousMatch {
        /// The number of tied candidates.
        count: usize,
        /// Why the tie could not be broken.
        reason: String,
    },
    /// The disambiguation responses never satisfied the response contract.
    #[error("disambiguation response invalid after {attempts} attempts: {last_error}")]
    LlmValidation {
        /// The number of requests sent.
        attempts: usize,
        /// The last validation failure.
        last_error: String,
    },
    /// The disambiguation transport kept failing.
    #[error("disambiguation transport failed after {attempts} attempts: {message}")]
    LlmTransport {
        /// The number of requests sent.
        attempts: usize,
        /// The last transport failure.
        message: String,
    },
    /// Error trying to access the given file.
    #[error("failed to read `{path:?}`: {source}")]
    Io {
        /// The path we attempted to access.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The options are invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,
    /// A background task failed.
    #[error("background task failed: {0}")]
    Task(String),
    /// A resolution drove its state machine into an invalid transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A stable machine-readable code for why a resolution did not succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    /// The netlist is malformed.
    #[serde(rename = "ParseError")]
    Parse,
    /// The netlist references an undefined subcircuit.
    #[serde(rename = "UndefinedReferenceError")]
    UndefinedReference,
    /// The netlist hierarchy is cyclic.
    #[serde(rename = "CyclicHierarchyError")]
    CyclicHierarchy,
    /// The netlist hierarchy could not be built.
    #[serde(rename = "GraphBuildError")]
    Graph,
    /// The golden path does not exist.
    #[serde(rename = "PathNotFoundError")]
    PathNotFound,
    /// Several candidates remain tied.
    #[serde(rename = "AmbiguousMatchError")]
    AmbiguousMatch,
    /// The disambiguation responses were invalid.
    #[serde(rename = "llm_validation_failed")]
    LlmValidationFailed,
    /// The disambiguation transport failed.
    #[serde(rename = "llm_transport_failed")]
    LlmTransportFailed,
    /// The disambiguator found no match.
    #[serde(rename = "no_match")]
    NoMatch,
    /// No candidate exists in the target.
    #[serde(rename = "no_candidates")]
    NoCandidates,
    /// Disambiguation was needed but no transport is configured.
    #[serde(rename = "disambiguation_unavailable")]
    DisambiguationUnavailable,
    /// A file could not be read.
    #[serde(rename = "IoError")]
    Io,
    /// The request or its options are invalid.
    #[serde(rename = "InvalidRequestError")]
    InvalidRequest,
    /// The request was cancelled.
    #[serde(rename = "cancelled")]
    Cancelled,
    /// An internal failure.
    #[serde(rename = "InternalError")]
    Internal,
}

impl Error {
    /// Attaches the netlist file to a parser error.
    pub fn from_parser(path: impl Into<PathBuf>, err: ParserError) -> Self {
        let path = path.into();
        match err {
            ParserError::Parse { line, reason } => Self::Parse { path, line, reason },
            ParserError::UndefinedReference { instance, master } => Self::UndefinedReference {
                path,
                instance,
                master,
            },
            ParserError::FailedToRead { path, err } => Self::Io { path, source: err },
        }
    }

    /// Attaches the netlist file to a graph build error.
    pub fn from_build(path: impl Into<PathBuf>, err: BuildError) -> Self {
        let path = path.into();
        match err {
            BuildError::CyclicHierarchy { .. } => Self::CyclicHierarchy { path, source: err },
            BuildError::UndefinedMaster { instance, master } => Self::UndefinedReference {
                path,
                instance,
                master,
            },
            err => Self::Graph { path, source: err },
        }
    }

    /// The reason code reported in results for this error.
    pub fn code(&self) -> ReasonCode {
        match self {
            Self::Parse { .. } => ReasonCode::Parse,
            Self::UndefinedReference { .. } => ReasonCode::UndefinedReference,
            Self::CyclicHierarchy { .. } => ReasonCode::CyclicHierarchy,
            Self::Graph { .. } => ReasonCode::Graph,
            Self::PathNotFound(_) => ReasonCode::PathNotFound,
            Self::AmbiguousMatch { .. } => ReasonCode::AmbiguousMatch,
            Self::LlmValidation { .. } => ReasonCode::LlmValidationFailed,
            Self::LlmTransport { .. } => ReasonCode::LlmTransportFailed,
            Self::Io { .. } => ReasonCode::Io,
            Self::InvalidRequest(_) | Self::Config(_) => ReasonCode::InvalidRequest,
            Self::Cancelled => ReasonCode::Cancelled,
            Self::Task(_) | Self::Transition(_) => ReasonCode::Internal,
        }
    }

    /// Returns `true` if the error concerns the request itself rather than one netlist or path.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::Config(_) | Self::Io { .. }
        )
    }
}
