use std::{collections::BTreeMap, sync::Arc};

use ethereum_types::{Address, H256};
use log::debug;
use mpt_store::NodeDb;

use crate::{
    account::Account,
    fixture::PreAccount,
    state::{StateDb, StateResult},
};

/// Writes the declared accounts into a state over `db` and commits it.
/// Returns the state together with its root.
///
/// Zero storage values are not stored, as on chain.
pub fn load_pre_state<D: NodeDb>(
    db: Arc<D>,
    pre: &BTreeMap<Address, PreAccount>,
) -> StateResult<(StateDb<D>, H256)> {
    let mut state = StateDb::new(db);
    for (address, declared) in pre {
        state.put_account(
            *address,
            Account {
                nonce: declared.nonce,
                balance: declared.balance,
                ..Default::default()
            },
        );
        state.set_code(*address, declared.code.clone())?;
        for (slot, value) in declared.storage.iter().filter(|(_, v)| !v.is_zero()) {
            let mut key = [0u8; 32];
            slot.to_big_endian(&mut key);
            state.set_storage(*address, H256(key), *value)?;
        }
    }

    let root = state.root()?;
    debug!("Loaded {} pre-state accounts under root {:x}", pre.len(), root);
    Ok((state, root))
}
