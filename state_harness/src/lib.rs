//! Runs state test vectors twice to prove that a minimal witness is enough to
//! execute them.
//!
//! For every selected case the harness
//! 1. materializes the declared pre-state in a fresh [`MemNodeDb`](mpt_store::MemNodeDb)
//!    ([`loader`]);
//! 2. executes the transaction against it while a [`RecordingDb`](recorder::RecordingDb)
//!    notes every pre-existing node the execution reads ([`recorder`]);
//! 3. builds a second store from nothing but those nodes ([`witness`]) and
//!    executes the same transaction again with a fresh engine
//!    ([`verifier`]).
//!
//! Both runs must reach the root declared by the fixture. A mismatch in the
//! first run means the vector or the engine is wrong; a mismatch (or an
//! unresolvable node) in the second means the witness is incomplete.
//!
//! Passing cases can be written out as a compact block body
//! (`[tx, [witness nodes...]]`, see [`codec`]) wrapped in a test vector for
//! stateless validators ([`artifact`]).
//!
//! The execution engine is pluggable through [`engine::Executor`]; the crate
//! ships [`engine::TransferExecutor`], which handles plain value transfers.
//!
//! ```no_run
//! use state_harness::{config::RunOptions, engine::TransferExecutor, runner::Harness};
//!
//! let options = RunOptions::from_env()?;
//! let harness = Harness::new(options, TransferExecutor::default);
//! let fixture = std::fs::read_to_string("GeneralStateTests/stExample/add11.json")?;
//! for report in harness.run_fixture_document(&fixture) {
//!     println!("{}: {:?}", report.name, report.outcome);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]

pub mod account;
pub mod artifact;
pub mod codec;
pub mod coinbase;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod hex;
pub mod loader;
pub mod recorder;
pub mod runner;
pub mod state;
pub mod trace;
pub mod transaction;
pub mod verifier;
pub mod witness;

pub use error::{CaseError, HarnessError};
pub use runner::{CaseOutcome, CaseReport, Harness};
