//! Hierarchy path resolution.
//!
//! Resolves instance paths of a golden netlist into the corresponding paths of one or
//! more target netlists. Each (golden path, target) pair passes through up to three
//! stages, driven by a [`machine::Machine`]:
//!
//! 1. [`structural`] matching compares rename-invariant node signatures.
//! 2. [`fuzzy`] ranking scores candidates by name and connectivity similarity.
//! 3. [`escalate`] asks an external decision maker to choose among what remains.
//!
//! The [`Coordinator`] fans a [`ResolutionRequest`] out over every pair and collects
//! a [`ResolutionResult`] per golden path, parsing each netlist at most once through
//! a shared [`ParseCache`].
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod escalate;
pub mod fuzzy;
pub mod machine;
pub mod nets;
pub mod pipeline;
pub mod result;
pub mod source;
pub mod structural;

pub use cache::ParseCache;
pub use config::MatchOptions;
pub use coordinator::{Coordinator, ResolutionRequest};
pub use error::{Error, ReasonCode, Result};
pub use escalate::{DisambiguationTransport, TransportError};
pub use result::{
    Candidate, Method, Reason, ResolutionResponse, ResolutionResult, Status, TargetResolution,
};
pub use source::{FsSource, NetlistSource};
