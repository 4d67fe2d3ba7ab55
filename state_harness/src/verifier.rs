//! Runs one case twice: against the full pre-state while recording the
//! witness, then against a state built from nothing but that witness.
//!
//! A case moves through
//! `NotRun → RunningFull → {PassedFull | FailedFull | RejectedInvalidTx} →
//! RunningWitness → {PassedWitness | WitnessInsufficient}`. Both passes must
//! reach the declared root. The second pass only starts once the first has
//! finished and the witness is final.

use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use ethereum_types::{Address, H256};
use log::debug;
use mpt_store::NodeDb;
use strum::Display;

use crate::{
    coinbase::apply_coinbase_revert,
    context::ExecutionContext,
    engine::{ExecutionError, Executor},
    error::{CaseError, HarnessError},
    fixture::SelectedCase,
    recorder::RecordingDb,
    state::{StateDb, StateError, StateResult},
    trace::{LogSink, NoopSink, TraceSink},
    transaction::ValidationError,
    witness::{build_witness_state, WitnessSet},
};

/// Where a case is in its two passes. Every variant except the `Running*`
/// ones is where a finished [`DualExecutionVerifier::verify`] call can leave
/// it.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum CasePhase {
    NotRun,
    RunningFull,
    PassedFull,
    /// The full-state pass errored or missed the declared root.
    FailedFull,
    RejectedInvalidTx,
    RunningWitness,
    PassedWitness,
    WitnessInsufficient,
}

/// What one execution pass ended with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PassOutcome {
    pub root: H256,
    /// `false` if the engine rejected the transaction.
    pub succeeded: bool,
    /// Whether the zero-balance coinbase was removed after a failure.
    pub coinbase_reverted: bool,
}

/// Both passes of a case that reached its declared root twice.
#[derive(Clone, Debug)]
pub struct Verification {
    pub sender: Address,
    pub pre_root: H256,
    pub post_root: H256,
    pub witness: WitnessSet,
    pub full: PassOutcome,
    pub witness_pass: PassOutcome,
}

#[derive(Clone, Debug)]
pub enum Verdict {
    /// The transaction failed static validation and was never executed.
    Rejected(ValidationError),
    Verified(Verification),
}

/// Drives the two passes of a case, each with an engine fresh from
/// `new_engine`.
pub struct DualExecutionVerifier<F> {
    new_engine: F,
    trace: bool,
    phase: CasePhase,
}

impl<F> Debug for DualExecutionVerifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualExecutionVerifier")
            .field("trace", &self.trace)
            .field("phase", &self.phase)
            .finish()
    }
}

impl<E: Executor, F: Fn() -> E> DualExecutionVerifier<F> {
    pub fn new(new_engine: F, trace: bool) -> Self {
        Self {
            new_engine,
            trace,
            phase: CasePhase::NotRun,
        }
    }

    pub fn phase(&self) -> CasePhase {
        self.phase
    }

    /// Verifies `case` against the pre-state committed to `full_db` under
    /// `pre_root`.
    ///
    /// Nodes written by the first pass stay in `full_db`; the witness only
    /// ever contains entries that were there before it started.
    pub fn verify<D: NodeDb>(
        &mut self,
        full_db: Arc<D>,
        pre_root: H256,
        case: &SelectedCase,
    ) -> Result<Verdict, CaseError> {
        self.phase = CasePhase::NotRun;
        let ctx = ExecutionContext::for_fork(case.fork);

        self.enter(CasePhase::RunningFull);
        let sender = match case.tx.validate(&ctx) {
            Ok(sender) => sender,
            Err(e) => {
                debug!("Transaction failed static validation: {}", e);
                self.enter(CasePhase::RejectedInvalidTx);
                return Ok(Verdict::Rejected(e));
            }
        };

        let recorder = Arc::new(
            RecordingDb::install(full_db)
                .map_err(|e| HarnessError::FullState(StateError::from(e)))?,
        );
        let mut state = StateDb::at_root(recorder.clone(), pre_root);
        let full = self.run_pass(&mut state, case, &ctx);
        let witness = recorder.finish();
        let full = match full {
            Ok(full) => full,
            Err(e) => {
                self.enter(CasePhase::FailedFull);
                return Err(HarnessError::FullState(e).into());
            }
        };

        if full.root != case.expected_root {
            self.enter(CasePhase::FailedFull);
            return Err(CaseError::FullRootMismatch {
                expected: case.expected_root,
                actual: full.root,
            });
        }
        self.enter(CasePhase::PassedFull);
        debug!("Recorded {} witness nodes", witness.len());

        self.enter(CasePhase::RunningWitness);
        let insufficient = |reason: String, missing: Option<H256>| {
            CaseError::WitnessInsufficient { reason, missing }
        };
        let witness_pass = build_witness_state(pre_root, &witness)
            .map_err(StateError::from)
            .and_then(|mut state| self.run_pass(&mut state, case, &ctx));
        let witness_pass = match witness_pass {
            Ok(outcome) if outcome.root == case.expected_root => outcome,
            Ok(outcome) => {
                self.enter(CasePhase::WitnessInsufficient);
                return Err(insufficient(
                    format!(
                        "witness-only state reached {:x}, expected {:x}",
                        outcome.root, case.expected_root
                    ),
                    None,
                ));
            }
            Err(e) => {
                self.enter(CasePhase::WitnessInsufficient);
                return Err(insufficient(e.to_string(), e.missing_key()));
            }
        };
        self.enter(CasePhase::PassedWitness);

        Ok(Verdict::Verified(Verification {
            sender,
            pre_root,
            post_root: full.root,
            witness,
            full,
            witness_pass,
        }))
    }

    /// Executes the transaction, applies the coinbase rule on failure and
    /// commits the result.
    fn run_pass<D: NodeDb>(
        &self,
        state: &mut StateDb<D>,
        case: &SelectedCase,
        ctx: &ExecutionContext,
    ) -> StateResult<PassOutcome> {
        let mut sink: Box<dyn TraceSink> = match self.trace {
            true => Box::new(LogSink),
            false => Box::new(NoopSink),
        };
        let mut engine = (self.new_engine)();

        let (succeeded, coinbase_reverted) =
            match engine.execute(state, &case.tx, &case.env, ctx, sink.as_mut()) {
                Ok(summary) => {
                    debug!("Transaction applied, {} gas used", summary.gas_used);
                    (true, false)
                }
                Err(ExecutionError::State(e)) => return Err(e),
                Err(e) => {
                    debug!("Transaction failed: {}", e);
                    (false, apply_coinbase_revert(state, case.env.coinbase)?)
                }
            };

        Ok(PassOutcome {
            root: state.root()?,
            succeeded,
            coinbase_reverted,
        })
    }

    fn enter(&mut self, phase: CasePhase) {
        debug!("{} -> {}", self.phase, phase);
        self.phase = phase;
    }
}
