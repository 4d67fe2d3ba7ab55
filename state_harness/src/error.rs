use std::path::PathBuf;

use ethereum_types::H256;
use thiserror::Error;

use crate::state::StateError;

/// Anything that keeps the harness from judging a case at all.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum HarnessError {
    #[error("Malformed fixture: {0}")]
    Fixture(String),

    #[error("Could not load the pre-state: {0}")]
    PreState(StateError),

    #[error("State failure during the full-state pass: {0}")]
    FullState(StateError),

    #[error("Could not write artifact {path:?}: {message}")]
    Artifact { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Case task died: {0}")]
    Task(String),
}

/// Why a case failed.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CaseError {
    /// The full state did not reach the declared root: the vector or the
    /// engine is wrong.
    #[error("Full-state root mismatch: expected {expected:x}, got {actual:x}")]
    FullRootMismatch { expected: H256, actual: H256 },

    /// The full state passed but the witness-only state did not: the
    /// recorded witness is missing something the engine needed.
    #[error("Witness insufficient: {reason}")]
    WitnessInsufficient {
        reason: String,
        /// The node the witness state could not resolve, if that is what
        /// went wrong.
        missing: Option<H256>,
    },

    #[error(transparent)]
    Harness(#[from] HarnessError),
}
