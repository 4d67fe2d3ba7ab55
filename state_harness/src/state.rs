//! Account, storage and code access on top of a [`StoreTrie`].
//!
//! Account writes are cached and only reach the trie on [`StateDb::flush`].
//! Everything is flushed in address order so that two executions of the same
//! transaction issue exactly the same sequence of store reads, which the
//! witness replay depends on.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use log::trace;
use mpt_store::{NodeDb, StoreError, StoreTrie, TrieError, EMPTY_TRIE_HASH};
use thiserror::Error;

use crate::account::{Account, EMPTY_CODE_HASH};

pub type StateResult<T> = Result<T, StateError>;

/// Failures of the state layer. None of these are transaction failures.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StateError {
    #[error(transparent)]
    Trie(#[from] TrieError),

    #[error("Undecodable account {address:?}: {err}")]
    Account {
        address: Address,
        err: rlp::DecoderError,
    },

    #[error("Undecodable storage value under slot {slot:x} of {address:?}: {err}")]
    Storage {
        address: Address,
        slot: H256,
        err: rlp::DecoderError,
    },

    #[error("Code {0:x} is missing from the node store")]
    MissingCode(H256),
}

impl From<StoreError> for StateError {
    fn from(e: StoreError) -> Self {
        StateError::Trie(e.into())
    }
}

impl StateError {
    /// The trie node or code blob the store could not provide, if that is what
    /// went wrong.
    pub fn missing_key(&self) -> Option<H256> {
        match self {
            StateError::Trie(e) => e.missing_node(),
            StateError::MissingCode(h) => Some(*h),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct CachedAccount {
    account: Option<Account>,
    dirty: bool,
}

/// The world state of one execution: the state trie, the storage tries of
/// the accounts touched so far and a write-back account cache.
#[derive(Debug)]
pub struct StateDb<D> {
    trie: StoreTrie<D>,
    cache: BTreeMap<Address, CachedAccount>,
    storage: BTreeMap<Address, StoreTrie<D>>,
    dirty_storage: BTreeSet<Address>,
}

impl<D: NodeDb> StateDb<D> {
    /// An empty state backed by `db`.
    pub fn new(db: Arc<D>) -> Self {
        Self::from_trie(StoreTrie::new(db))
    }

    /// The state whose root is `root`.
    pub fn at_root(db: Arc<D>, root: H256) -> Self {
        Self::from_trie(StoreTrie::at_root(db, root))
    }

    fn from_trie(trie: StoreTrie<D>) -> Self {
        Self {
            trie,
            cache: BTreeMap::new(),
            storage: BTreeMap::new(),
            dirty_storage: BTreeSet::new(),
        }
    }

    /// The store behind the state trie.
    pub fn db(&self) -> &Arc<D> {
        self.trie.db()
    }

    /// Returns `true` if there are account or storage writes that have not
    /// been flushed into the trie yet.
    pub fn has_pending_changes(&self) -> bool {
        !self.dirty_storage.is_empty() || self.cache.values().any(|c| c.dirty)
    }

    /// Reads an account, `None` if it does not exist.
    pub fn account(&mut self, address: Address) -> StateResult<Option<Account>> {
        if let Some(cached) = self.cache.get(&address) {
            return Ok(cached.account);
        }

        let account = match self.trie.get(keccak(address).as_bytes())? {
            Some(bytes) => Some(
                rlp::decode::<Account>(&bytes)
                    .map_err(|err| StateError::Account { address, err })?,
            ),
            None => None,
        };
        self.cache.insert(
            address,
            CachedAccount {
                account,
                dirty: false,
            },
        );
        Ok(account)
    }

    /// Reads an account, treating a missing one as empty.
    pub fn account_or_default(&mut self, address: Address) -> StateResult<Account> {
        Ok(self.account(address)?.unwrap_or_default())
    }

    /// Schedules `account` to be written under `address`.
    pub fn put_account(&mut self, address: Address, account: Account) {
        self.cache.insert(
            address,
            CachedAccount {
                account: Some(account),
                dirty: true,
            },
        );
    }

    /// Schedules the removal of the account record under `address`, along
    /// with any pending storage writes for it.
    pub fn delete_account(&mut self, address: Address) {
        trace!("Deleting account {:?}", address);
        self.storage.remove(&address);
        self.dirty_storage.remove(&address);
        self.cache.insert(
            address,
            CachedAccount {
                account: None,
                dirty: true,
            },
        );
    }

    /// The code of `address`, empty for accounts without code.
    pub fn code(&mut self, address: Address) -> StateResult<Vec<u8>> {
        let code_hash = match self.account(address)? {
            Some(account) => account.code_hash,
            None => return Ok(Vec::new()),
        };
        if code_hash == EMPTY_CODE_HASH {
            return Ok(Vec::new());
        }

        self.db()
            .get(code_hash.as_bytes())?
            .ok_or(StateError::MissingCode(code_hash))
    }

    /// Stores `code` under its hash and points the account at it.
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) -> StateResult<()> {
        let mut account = self.account_or_default(address)?;
        account.code_hash = match code.is_empty() {
            true => EMPTY_CODE_HASH,
            false => {
                let hash = keccak(&code);
                self.db().put(hash.as_bytes(), code)?;
                hash
            }
        };
        self.put_account(address, account);
        Ok(())
    }

    /// Reads a storage slot.
    pub fn storage(&mut self, address: Address, slot: H256) -> StateResult<U256> {
        if self.account(address)?.is_none() {
            return Ok(U256::zero());
        }

        match self.open_storage(address)?.get(keccak(slot).as_bytes())? {
            Some(bytes) => rlp::decode::<U256>(&bytes)
                .map_err(|err| StateError::Storage { address, slot, err }),
            None => Ok(U256::zero()),
        }
    }

    /// Writes a storage slot. Writing zero clears it.
    pub fn set_storage(&mut self, address: Address, slot: H256, value: U256) -> StateResult<()> {
        if self.account(address)?.is_none() {
            self.put_account(address, Account::default());
        }

        let key = keccak(slot);
        let trie = self.open_storage(address)?;
        match value.is_zero() {
            true => {
                trie.remove(key.as_bytes())?;
            }
            false => trie.insert(key.as_bytes(), rlp::encode(&value).to_vec())?,
        }
        self.dirty_storage.insert(address);
        Ok(())
    }

    /// Writes every pending account and storage change into the tries.
    pub fn flush(&mut self) -> StateResult<()> {
        for address in std::mem::take(&mut self.dirty_storage) {
            let Some(trie) = self.storage.get_mut(&address) else {
                continue;
            };
            let storage_root = trie.commit()?;
            let mut account = self
                .cache
                .get(&address)
                .and_then(|c| c.account)
                .unwrap_or_default();
            account.storage_root = storage_root;
            self.put_account(address, account);
        }

        for (address, cached) in self.cache.iter_mut().filter(|(_, c)| c.dirty) {
            let key = keccak(address);
            match cached.account {
                Some(account) => {
                    trace!("Flushing account {:?}", address);
                    self.trie
                        .insert(key.as_bytes(), rlp::encode(&account).to_vec())?
                }
                None => {
                    trace!("Flushing deletion of {:?}", address);
                    self.trie.remove(key.as_bytes())?;
                }
            }
            cached.dirty = false;
        }
        Ok(())
    }

    /// Flushes pending changes, commits all nodes to the store and returns
    /// the state root.
    pub fn root(&mut self) -> StateResult<H256> {
        self.flush()?;
        Ok(self.trie.commit()?)
    }

    fn open_storage(&mut self, address: Address) -> StateResult<&mut StoreTrie<D>> {
        let storage_root = match self.storage.contains_key(&address) {
            true => None,
            false => Some(self.account_or_default(address)?.storage_root),
        };
        let db = self.db().clone();
        Ok(self
            .storage
            .entry(address)
            .or_insert_with(|| StoreTrie::at_root(db, storage_root.unwrap_or(EMPTY_TRIE_HASH))))
    }
}

#[cfg(test)]
mod tests {
    use mpt_store::MemNodeDb;

    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[test]
    fn empty_state_has_empty_root() {
        let mut state = StateDb::new(Arc::new(MemNodeDb::new()));
        assert_eq!(state.root().unwrap(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn accounts_survive_a_reopen() {
        let db = Arc::new(MemNodeDb::new());
        let mut state = StateDb::new(db.clone());
        let account = Account {
            balance: 100.into(),
            ..Default::default()
        };
        state.put_account(addr(1), account);
        state.set_code(addr(2), vec![0x60, 0x00]).unwrap();
        state.set_storage(addr(2), H256::from_low_u64_be(1), 7.into()).unwrap();
        assert!(state.has_pending_changes());
        let root = state.root().unwrap();
        assert!(!state.has_pending_changes());

        let mut reopened = StateDb::at_root(db, root);
        assert_eq!(reopened.account(addr(1)).unwrap(), Some(account));
        assert_eq!(reopened.code(addr(2)).unwrap(), vec![0x60, 0x00]);
        assert_eq!(
            reopened.storage(addr(2), H256::from_low_u64_be(1)).unwrap(),
            7.into()
        );
        assert_eq!(reopened.storage(addr(3), H256::zero()).unwrap(), U256::zero());
        assert_eq!(reopened.account(addr(3)).unwrap(), None);
    }

    #[test]
    fn deleting_an_account_restores_the_previous_root() {
        let db = Arc::new(MemNodeDb::new());
        let mut state = StateDb::new(db);
        state.put_account(addr(1), Account::default());
        let before = state.root().unwrap();

        state.put_account(addr(9), Account::default());
        assert_ne!(state.root().unwrap(), before);

        state.delete_account(addr(9));
        assert_eq!(state.root().unwrap(), before);
        assert_eq!(state.account(addr(9)).unwrap(), None);
    }

    #[test]
    fn clearing_the_only_slot_restores_the_empty_storage_root() {
        let mut state = StateDb::new(Arc::new(MemNodeDb::new()));
        let slot = H256::from_low_u64_be(4);
        state.set_storage(addr(5), slot, 1.into()).unwrap();
        state.flush().unwrap();
        assert_ne!(state.account(addr(5)).unwrap().unwrap().storage_root, EMPTY_TRIE_HASH);

        state.set_storage(addr(5), slot, U256::zero()).unwrap();
        state.flush().unwrap();
        assert_eq!(state.account(addr(5)).unwrap().unwrap().storage_root, EMPTY_TRIE_HASH);
    }
}
