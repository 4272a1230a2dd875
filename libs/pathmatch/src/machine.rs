//! The per-pair resolution state machine.
//!
//! Every (golden path, target) pair is driven through a [`Machine`]. The matching
//! stages report what they found as [`Event`]s; the machine decides the next
//! [`Phase`] and enforces the retry budgets, so no stage can loop on its own.

use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

/// The phase of a resolution.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Comparing signatures.
    Structural,
    /// Ranking candidates by name and connectivity.
    Fuzzy,
    /// Waiting on the disambiguation transport.
    Escalating,
    /// Checking a disambiguation response.
    Validating,
    /// A single target path was chosen.
    Resolved,
    /// Several candidates remain tied.
    Ambiguous,
    /// No target path could be chosen.
    Unresolved,
    /// The resolution failed.
    Error,
}

impl Phase {
    /// Returns `true` if no further event is accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Ambiguous | Self::Unresolved | Self::Error
        )
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Structural => "structural",
            Self::Fuzzy => "fuzzy",
            Self::Escalating => "escalating",
            Self::Validating => "validating",
            Self::Resolved => "resolved",
            Self::Ambiguous => "ambiguous",
            Self::Unresolved => "unresolved",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The outcome of a valid disambiguation response.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Verdict {
    /// The response named one candidate.
    Match,
    /// The response declared that no candidate matches.
    NoMatch,
    /// The response declared several candidates equally good.
    Tie,
}

/// Something a matching stage observed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    /// Exactly one target node shares the golden signature.
    StructuralUnique,
    /// Several target nodes share the golden signature.
    StructuralTied,
    /// No target node shares the golden signature.
    StructuralNone,
    /// The fuzzy ranking accepted its best candidate.
    FuzzyAccepted,
    /// The fuzzy ranking could not separate its best candidates.
    FuzzyUndecided,
    /// Disambiguation is needed but cannot be attempted.
    EscalationUnavailable {
        /// Whether several candidates were left tied.
        tied: bool,
    },
    /// The transport returned a response.
    ResponseReceived,
    /// The transport failed.
    TransportFailed {
        /// Whether the failure is worth retrying.
        retryable: bool,
    },
    /// The response satisfied the response contract.
    ResponseValid(Verdict),
    /// The response violated the response contract.
    ResponseInvalid,
    /// An unrecoverable failure.
    Failed,
}

/// An event that is not accepted in the current phase.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("event {event:?} is not valid in phase `{phase}`")]
pub struct TransitionError {
    /// The phase the machine was in.
    pub phase: Phase,
    /// The rejected event.
    pub event: Event,
}

/// Drives one resolution through its phases.
#[derive(Debug, Clone)]
pub struct Machine {
    phase: Phase,
    max_validation_retries: usize,
    max_transport_retries: usize,
    validation_failures: usize,
    transport_failures: usize,
    requests: usize,
}

impl Machine {
    /// Creates a machine in the [`Phase::Structural`] phase.
    pub fn new(max_validation_retries: usize, max_transport_retries: usize) -> Self {
        Self {
            phase: Phase::Structural,
            max_validation_retries,
            max_transport_retries,
            validation_failures: 0,
            transport_failures: 0,
            requests: 0,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The number of invalid responses seen so far.
    pub fn validation_failures(&self) -> usize {
        self.validation_failures
    }

    /// The number of transport failures seen so far.
    pub fn transport_failures(&self) -> usize {
        self.transport_failures
    }

    /// The number of disambiguation requests attempted so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Marks the start of a disambiguation request.
    ///
    /// Only meaningful in [`Phase::Escalating`].
    pub fn begin_request(&mut self) {
        if self.phase == Phase::Escalating {
            self.requests += 1;
        }
    }

    /// Applies an event, returning the new phase.
    pub fn apply(&mut self, event: Event) -> Result<Phase, TransitionError> {
        use Event::*;
        use Phase::*;

        let next = match (self.phase, event) {
            (phase, Failed) if !phase.is_terminal() => Error,
            (Structural, StructuralUnique) => Resolved,
            (Structural, StructuralTied | StructuralNone) => Fuzzy,
            (Fuzzy, FuzzyAccepted) => Resolved,
            (Fuzzy, FuzzyUndecided) => Escalating,
            (Fuzzy | Escalating, EscalationUnavailable { tied: true }) => Ambiguous,
            (Fuzzy | Escalating, EscalationUnavailable { tied: false }) => Unresolved,
            (Escalating, ResponseReceived) => Validating,
            (Escalating, TransportFailed { retryable }) => {
                self.transport_failures += 1;
                if retryable && self.transport_failures <= self.max_transport_retries {
                    Escalating
                } else {
                    Unresolved
                }
            }
            (Validating, ResponseValid(Verdict::Match)) => Resolved,
            (Validating, ResponseValid(Verdict::NoMatch)) => Unresolved,
            (Validating, ResponseValid(Verdict::Tie)) => Ambiguous,
            (Validating, ResponseInvalid) => {
                self.validation_failures += 1;
                if self.validation_failures <= self.max_validation_retries {
                    Escalating
                } else {
                    Unresolved
                }
            }
            (phase, event) => return Err(TransitionError { phase, event }),
        };
        tracing::trace!(from = %self.phase, to = %next, ?event, "resolution transition");
        self.phase = next;
        Ok(next)
    }
}
