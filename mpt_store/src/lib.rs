//! A content-addressed node store and an Ethereum Merkle Patricia trie built
//! on top of it.
//!
//! Unlike an in-memory trie, a [`StoreTrie`](trie::StoreTrie) only knows the
//! hash of its root when it is opened. Every other node is fetched lazily
//! through [`NodeDb::get`](db::NodeDb::get) the first time a traversal needs
//! it. That makes the set of nodes an operation depends on observable from the
//! store side, which is what stateless witness generation relies on.
//!
//! Nodes are keyed by the keccak hash of their RLP encoding, so identical
//! subtrees always land on the same key and tries can share a single store.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

use ethereum_types::H256;

pub mod db;
pub mod nibbles;
pub mod node;
pub mod trie;

#[cfg(test)]
pub(crate) mod testing_utils;

pub use db::{MemNodeDb, NodeDb, StoreError, StoreResult};
pub use trie::{StoreTrie, TrieError, TrieResult};

/// The hash of an empty Merkle Patricia trie.
/// 0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421
pub const EMPTY_TRIE_HASH: H256 = H256([
    86, 232, 31, 23, 27, 204, 85, 166, 255, 131, 69, 230, 146, 192, 248, 110, 91, 72, 224, 27, 153,
    108, 173, 192, 1, 98, 47, 181, 227, 99, 180, 33,
]);

#[test]
fn test_empty_trie_hash() {
    assert_eq!(EMPTY_TRIE_HASH, keccak_hash::keccak(rlp::NULL_RLP));
}
