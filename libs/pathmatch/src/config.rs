//! Resolution options.

use std::path::Path;
use std::time::Duration;

use hiergraph::{BuildOptions, Roots};
use netlist::Dialect;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The model requested from the disambiguation transport by default.
pub const DEFAULT_MODEL: &str = "llama3.3-70b-instruct";

/// Options controlling resolution.
///
/// Every field has a default, so options may be given partially in TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// The fuzzy score a candidate must exceed to be accepted.
    pub acceptance_threshold: f64,
    /// The lead over the runner-up a fuzzy candidate needs to be accepted.
    pub tie_margin: f64,
    /// How many times an invalid disambiguation response is re-prompted.
    pub max_validation_retries: usize,
    /// How many times a retryable transport failure is retried.
    pub max_transport_retries: usize,
    /// The first transport retry delay, in milliseconds.
    pub backoff_initial_ms: u64,
    /// The largest transport retry delay, in milliseconds.
    pub backoff_max_ms: u64,
    /// The timeout of a single disambiguation call, in seconds.
    pub call_timeout_secs: u64,
    /// How many (path, target) pairs may resolve at once.
    pub max_concurrency: usize,
    /// How many fuzzy-ranked candidates are offered for disambiguation.
    pub max_llm_candidates: usize,
    /// The separator between instance names in paths.
    pub path_separator: char,
    /// The model requested from the disambiguation transport.
    pub model: String,
    /// Forces a netlist dialect instead of detecting it per file.
    pub dialect: Option<Dialect>,
    /// How many parsed netlists the cache keeps.
    pub cache_capacity: usize,
    /// Validates the request without resolving any path.
    pub dry_run: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.75,
            tie_margin: 0.10,
            max_validation_retries: 2,
            max_transport_retries: 1,
            backoff_initial_ms: 250,
            backoff_max_ms: 2000,
            call_timeout_secs: 30,
            max_concurrency: 4,
            max_llm_candidates: 8,
            path_separator: hiergraph::DEFAULT_SEPARATOR,
            model: DEFAULT_MODEL.to_string(),
            dialect: None,
            cache_capacity: 64,
            dry_run: false,
        }
    }
}

impl MatchOptions {
    /// Reads options from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let opts: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("could not parse TOML: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Checks that the options are usable.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(Error::Config(format!(
                "acceptance_threshold must lie in [0, 1], got {}",
                self.acceptance_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.tie_margin) {
            return Err(Error::Config(format!(
                "tie_margin must lie in [0, 1], got {}",
                self.tie_margin
            )));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be positive".into()));
        }
        if self.max_llm_candidates < 2 {
            return Err(Error::Config("max_llm_candidates must be at least 2".into()));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be positive".into()));
        }
        if self.path_separator.is_whitespace() {
            return Err(Error::Config("path_separator must not be whitespace".into()));
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(Error::Config(
                "backoff_initial_ms must not exceed backoff_max_ms".into(),
            ));
        }
        Ok(())
    }

    /// The timeout of a single disambiguation call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// The options used to build hierarchy graphs.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            separator: self.path_separator,
            roots: Roots::Auto,
        }
    }
}
