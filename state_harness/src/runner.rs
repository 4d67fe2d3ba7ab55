//! Per-case orchestration: select, load, verify, emit.
//!
//! A case that fails is reported and the run moves on; nothing a single case
//! does can abort the others.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

use ethereum_types::H256;
use log::{error, info, warn};
use mpt_store::MemNodeDb;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    artifact::{write_artifact, TestVector},
    codec::{encode_block_body, TxTuple},
    config::RunOptions,
    engine::Executor,
    error::{CaseError, HarnessError},
    fixture::{parse_fixture, select_cases, SelectedCase, StateTest},
    loader::load_pre_state,
    transaction::ValidationError,
    verifier::{DualExecutionVerifier, Verdict},
};

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// Static validation failed, the transaction was never executed.
    InvalidTransaction(ValidationError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaseOutcome {
    Passed {
        post_root: H256,
        witness_nodes: usize,
        artifact: Option<PathBuf>,
    },
    Skipped(SkipReason),
    Failed(CaseError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseReport {
    /// `<test>-<fork>-d<data>g<gas>v<value>`, or the test name for failures
    /// that happen before cases are selected.
    pub name: String,
    pub outcome: CaseOutcome,
}

impl CaseReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, CaseOutcome::Failed(_))
    }
}

/// Runs fixtures with the given options, creating engines with `new_engine`.
#[derive(Clone, Debug)]
pub struct Harness<F> {
    options: Arc<RunOptions>,
    new_engine: F,
}

impl<E: Executor, F: Fn() -> E> Harness<F> {
    pub fn new(options: RunOptions, new_engine: F) -> Self {
        Self {
            options: Arc::new(options),
            new_engine,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// The cases of `test` this harness is configured to run.
    pub fn select(&self, name: &str, test: &StateTest) -> Result<Vec<SelectedCase>, HarnessError> {
        let cases = select_cases(name, test, self.options.fork, &self.options.selectors)?;
        if cases.is_empty() {
            warn!("{}: no cases for {}", name, self.options.fork);
        }
        Ok(cases)
    }

    /// Runs one case from a fresh store.
    ///
    /// A panic inside the case (typically from the engine) is turned into a
    /// failed report.
    pub fn run_case(&self, case: &SelectedCase) -> CaseReport {
        let name = case.name();
        let res = panic::catch_unwind(AssertUnwindSafe(|| self.try_run_case(case)))
            .unwrap_or_else(|payload| Err(HarnessError::Task(panic_message(payload)).into()));
        let outcome = match res {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{}: {}", name, e);
                CaseOutcome::Failed(e)
            }
        };
        if let CaseOutcome::Skipped(reason) = &outcome {
            info!("{}: skipped ({:?})", name, reason);
        }
        CaseReport { name, outcome }
    }

    fn try_run_case(&self, case: &SelectedCase) -> Result<CaseOutcome, CaseError> {
        let db = Arc::new(MemNodeDb::new());
        let (_, pre_root) = load_pre_state(db.clone(), &case.pre).map_err(HarnessError::PreState)?;

        let mut verifier = DualExecutionVerifier::new(&self.new_engine, self.options.trace);
        let verification = match verifier.verify(db, pre_root, case)? {
            Verdict::Rejected(e) => {
                return Ok(CaseOutcome::Skipped(SkipReason::InvalidTransaction(e)))
            }
            Verdict::Verified(v) => v,
        };

        let artifact = match self.options.emit_artifact {
            true => {
                let body =
                    encode_block_body(&TxTuple::new(verification.sender, &case.tx), &verification.witness);
                let vector = TestVector::new(
                    &self.options.execution_script,
                    verification.pre_root,
                    &body,
                    verification.post_root,
                );
                Some(write_artifact(&self.options.artifact_dir, case, &vector)?)
            }
            false => None,
        };

        info!(
            "{}: passed with {} witness nodes",
            case.name(),
            verification.witness.len()
        );
        Ok(CaseOutcome::Passed {
            post_root: verification.post_root,
            witness_nodes: verification.witness.len(),
            artifact,
        })
    }

    /// Runs every selected case of `test` in order.
    pub fn run_test(&self, name: &str, test: &StateTest) -> Vec<CaseReport> {
        match self.select(name, test) {
            Ok(cases) => cases.iter().map(|case| self.run_case(case)).collect(),
            Err(e) => vec![test_failure(name, e)],
        }
    }

    /// Runs every test of a fixture document.
    pub fn run_fixture_document(&self, json: &str) -> Vec<CaseReport> {
        match parse_fixture(json) {
            Ok(tests) => tests
                .iter()
                .flat_map(|(name, test)| self.run_test(name, test))
                .collect(),
            Err(e) => vec![test_failure("<fixture>", e)],
        }
    }
}

impl<E, F> Harness<F>
where
    E: Executor,
    F: Fn() -> E + Clone + Send + Sync + 'static,
{
    /// Like [`Harness::run_test`], with cases running on the blocking pool,
    /// at most `max_concurrency` at a time. Reports come back in selection
    /// order.
    pub async fn run_test_concurrently(&self, name: &str, test: &StateTest) -> Vec<CaseReport> {
        let cases = match self.select(name, test) {
            Ok(cases) => cases,
            Err(e) => return vec![test_failure(name, e)],
        };

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let mut tasks = JoinSet::new();
        for (idx, case) in cases.into_iter().enumerate() {
            let harness = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let name = case.name();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (idx, task_failure(name, e.to_string())),
                };
                let report = tokio::task::spawn_blocking(move || harness.run_case(&case)).await;
                (idx, report.unwrap_or_else(|e| task_failure(name, e.to_string())))
            });
        }

        let mut reports = Vec::new();
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(report) => reports.push(report),
                Err(e) => error!("{}: case task failed: {}", name, e),
            }
        }
        reports.sort_by_key(|(idx, _)| *idx);
        reports.into_iter().map(|(_, report)| report).collect()
    }
}

fn test_failure(name: &str, e: HarnessError) -> CaseReport {
    error!("{}: {}", name, e);
    CaseReport {
        name: name.to_owned(),
        outcome: CaseOutcome::Failed(e.into()),
    }
}

fn task_failure(name: String, message: String) -> CaseReport {
    error!("{}: {}", name, message);
    CaseReport {
        name,
        outcome: CaseOutcome::Failed(HarnessError::Task(message).into()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => format!("panicked: {msg}"),
        Err(payload) => match payload.downcast_ref::<&str>() {
            Some(msg) => format!("panicked: {msg}"),
            None => "panicked".to_owned(),
        },
    }
}
