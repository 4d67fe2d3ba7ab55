//! Witness sets and the standalone state built from them.

use std::{collections::BTreeMap, sync::Arc};

use ethereum_types::H256;
use keccak_hash::keccak;
use log::debug;
use mpt_store::{MemNodeDb, NodeDb, StoreResult};

use crate::state::StateDb;

/// The pre-existing store entries one execution read, keyed by node hash.
///
/// Only [`RecordingDb`](crate::recorder::RecordingDb) and the block body
/// decoder produce these; once handed out a set is never modified. Entries
/// iterate in key order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WitnessSet {
    nodes: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl WitnessSet {
    pub(crate) fn from_recorded(nodes: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self { nodes }
    }

    /// Rebuilds a set from bare node blobs by keying each under its hash.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            nodes: nodes
                .into_iter()
                .map(|n| (keccak(&n).as_bytes().to_vec(), n))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.nodes.get(key).map(Vec::as_slice)
    }

    /// `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.nodes.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Node blobs in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &[u8]> {
        self.nodes.values().map(Vec::as_slice)
    }

    /// A copy of this set without `key`.
    pub fn without(&self, key: &[u8]) -> WitnessSet {
        let mut nodes = self.nodes.clone();
        nodes.remove(key);
        Self { nodes }
    }

    /// A fresh store holding exactly these entries, written in one batch.
    pub fn to_db(&self) -> StoreResult<MemNodeDb> {
        let db = MemNodeDb::new();
        db.put_batch(
            self.nodes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )?;
        Ok(db)
    }
}

/// Opens the state at `pre_root` over a store containing nothing but
/// `witness`.
pub fn build_witness_state(
    pre_root: H256,
    witness: &WitnessSet,
) -> StoreResult<StateDb<MemNodeDb>> {
    let db = witness.to_db()?;
    debug!(
        "Built witness store with {} nodes under pre-state root {:x}",
        db.len(),
        pre_root
    );
    Ok(StateDb::at_root(Arc::new(db), pre_root))
}
