//! The execution engine contract and a reference engine for value transfers.

use ethereum_types::{Address, U256};
use log::debug;
use mpt_store::NodeDb;
use thiserror::Error;

use crate::{
    context::{BlockContext, ExecutionContext},
    state::{StateDb, StateError},
    trace::{TraceSink, TxRecord},
    transaction::{Transaction, ValidationError},
};

/// Why an engine did not apply a transaction.
///
/// Everything except [`ExecutionError::State`] is a failure of the
/// transaction itself. `State` means the engine could not read or write the
/// state it was given, which is never the transaction's fault.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExecutionError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Nonce mismatch for {sender:?}: account has {expected}, transaction has {got}")]
    NonceMismatch {
        sender: Address,
        expected: U256,
        got: U256,
    },

    #[error("Insufficient balance for {sender:?}: has {balance}, needs {required}")]
    InsufficientBalance {
        sender: Address,
        balance: U256,
        required: U256,
    },

    #[error("Gas limit {gas_limit} exceeds the block gas limit {block_gas_limit}")]
    BlockGasLimitExceeded {
        gas_limit: U256,
        block_gas_limit: U256,
    },

    #[error("Crediting {credit} to {address:?} overflows its balance")]
    BalanceOverflow {
        address: Address,
        credit: U256,
    },

    #[error("Unsupported transaction: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ExecutionError {
    /// Returns `true` if the transaction failed, as opposed to the state
    /// underneath the engine.
    pub fn is_tx_failure(&self) -> bool {
        !matches!(self, ExecutionError::State(_))
    }
}

/// What a successful run reports back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutionSummary {
    pub sender: Address,
    pub gas_used: U256,
}

/// An execution engine bound to nothing: every call receives the state to
/// mutate, the transaction, the block and the fork rules.
///
/// Engines keep no state between calls, but the harness still creates a
/// fresh one for every pass.
pub trait Executor {
    fn execute<D: NodeDb>(
        &mut self,
        state: &mut StateDb<D>,
        tx: &Transaction,
        block: &BlockContext,
        ctx: &ExecutionContext,
        sink: &mut dyn TraceSink,
    ) -> Result<ExecutionSummary, ExecutionError>;
}

/// Reference engine: plain value transfers between accounts without code.
///
/// Fees are `gas_used * gas_price` with `gas_used` equal to the intrinsic
/// gas, credited to the coinbase. Every check runs before the first write, so
/// a failed transaction leaves the state untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferExecutor;

impl Executor for TransferExecutor {
    fn execute<D: NodeDb>(
        &mut self,
        state: &mut StateDb<D>,
        tx: &Transaction,
        block: &BlockContext,
        ctx: &ExecutionContext,
        sink: &mut dyn TraceSink,
    ) -> Result<ExecutionSummary, ExecutionError> {
        let res = apply_transfer(state, tx, block, ctx);
        let (sender, gas_used, error) = match &res {
            Ok(summary) => (summary.sender, summary.gas_used, None),
            Err(e) => (
                tx.sender().unwrap_or_default(),
                U256::zero(),
                Some(e.to_string()),
            ),
        };
        sink.after_tx(&TxRecord {
            sender,
            to: tx.to,
            gas_used,
            state_root: None,
            error,
        });
        res
    }
}

fn apply_transfer<D: NodeDb>(
    state: &mut StateDb<D>,
    tx: &Transaction,
    block: &BlockContext,
    ctx: &ExecutionContext,
) -> Result<ExecutionSummary, ExecutionError> {
    let sender = tx.validate(ctx)?;
    let to = tx
        .to
        .ok_or(ExecutionError::Unsupported("contract creation"))?;

    if tx.gas_limit > block.gas_limit {
        return Err(ExecutionError::BlockGasLimitExceeded {
            gas_limit: tx.gas_limit,
            block_gas_limit: block.gas_limit,
        });
    }

    let mut from = state.account_or_default(sender)?;
    if from.nonce != tx.nonce {
        return Err(ExecutionError::NonceMismatch {
            sender,
            expected: from.nonce,
            got: tx.nonce,
        });
    }

    let upfront = tx
        .gas_limit
        .checked_mul(tx.gas_price)
        .and_then(|gas| gas.checked_add(tx.value))
        .ok_or(ExecutionError::InsufficientBalance {
            sender,
            balance: from.balance,
            required: U256::MAX,
        })?;
    if from.balance < upfront {
        return Err(ExecutionError::InsufficientBalance {
            sender,
            balance: from.balance,
            required: upfront,
        });
    }

    if !state.code(to)?.is_empty() {
        return Err(ExecutionError::Unsupported("call into contract code"));
    }

    let gas_used = U256::from(tx.intrinsic_gas(ctx));
    let fee = gas_used * tx.gas_price;

    from.nonce += U256::one();
    from.balance -= fee + tx.value;

    // Recipient and coinbase may alias the sender or each other, so each one
    // starts from the already updated copy.
    let mut recipient = match to == sender {
        true => from,
        false => state.account_or_default(to)?,
    };
    recipient.balance = credit(to, recipient.balance, tx.value)?;

    let mut coinbase = match block.coinbase {
        c if c == to => recipient,
        c if c == sender => from,
        c => state.account_or_default(c)?,
    };
    coinbase.balance = credit(block.coinbase, coinbase.balance, fee)?;

    state.put_account(sender, from);
    state.put_account(to, recipient);
    state.put_account(block.coinbase, coinbase);

    if ctx.eip158 {
        for touched in [sender, to, block.coinbase] {
            if state.account_or_default(touched)?.is_empty() {
                debug!("Removing touched empty account {:?}", touched);
                state.delete_account(touched);
            }
        }
    }

    Ok(ExecutionSummary { sender, gas_used })
}

fn credit(address: Address, balance: U256, amount: U256) -> Result<U256, ExecutionError> {
    balance
        .checked_add(amount)
        .ok_or(ExecutionError::BalanceOverflow {
            address,
            credit: amount,
        })
}
