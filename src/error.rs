//! Error taxonomy for grammar analysis.
//!
//! Two failure classes are distinguished deliberately:
//!
//! - **Request-fatal** ([`InvalidGrammar`], [`RuleNotFound`]): the whole
//!   analysis aborts and the structured detail (offending name/location) is
//!   returned to the caller immediately.
//! - **Recoverable** ([`SampleTimeout`]): one profiler sample exceeded its
//!   budget; the sample is skipped and counted, the batch continues.
//!
//! [`Internal`] indicates a structurally invalid automaton reference seen
//! mid-traversal, an upstream contract violation, surfaced distinctly from
//! user input errors.
//!
//! [`InvalidGrammar`]: AnalysisError::InvalidGrammar
//! [`RuleNotFound`]: AnalysisError::RuleNotFound
//! [`SampleTimeout`]: AnalysisError::SampleTimeout
//! [`Internal`]: AnalysisError::Internal

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum AnalysisError {
    /// Malformed grammar handed over by the compiler collaborator (duplicate
    /// declaration, unresolved rule reference, dangling state index).
    #[error("invalid grammar: {detail}")]
    InvalidGrammar { detail: String },

    /// The requested rule is absent from the rule table.
    #[error("rule not found: \"{name}\"")]
    RuleNotFound { name: String },

    /// One profiler sample exceeded its time budget. Recoverable: the sample
    /// is skipped and the batch continues.
    #[error("sample {sample_index} exceeded its time budget")]
    SampleTimeout { sample_index: usize },

    /// A traversal hit a structurally invalid automaton reference, or a
    /// collaborator broke its contract.
    #[error("internal analysis error: {detail}")]
    Internal { detail: String },
}

impl AnalysisError {
    /// Whether the error aborts the whole request (as opposed to a
    /// skip-and-continue per-sample failure).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AnalysisError::SampleTimeout { .. })
    }
}
