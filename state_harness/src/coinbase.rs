use ethereum_types::Address;
use log::debug;
use mpt_store::NodeDb;

use crate::state::{StateDb, StateResult};

/// Cleanup after a failed transaction: a coinbase holding exactly zero wei
/// (or not existing at all) is removed from the state, and pending account
/// changes are flushed into the trie.
///
/// Only call this when the engine reported a transaction failure. Returns
/// `true` if the account was removed.
pub fn apply_coinbase_revert<D: NodeDb>(
    state: &mut StateDb<D>,
    coinbase: Address,
) -> StateResult<bool> {
    let balance = state.account(coinbase)?.map(|a| a.balance).unwrap_or_default();
    if !balance.is_zero() {
        return Ok(false);
    }

    debug!("Removing zero-balance coinbase {:?} after a failed transaction", coinbase);
    state.delete_account(coinbase);
    state.flush()?;
    Ok(true)
}
