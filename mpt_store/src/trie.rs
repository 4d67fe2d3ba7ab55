//! A Merkle Patricia trie whose nodes live in a [`NodeDb`].
//!
//! The trie keeps the nodes it has already fetched in memory, so every stored
//! node is read at most once per [`StoreTrie`] instance. Writes are buffered
//! until [`StoreTrie::commit`], which stores every node whose encoding is at
//! least 32 bytes (plus the root, whatever its size) in one batch.

use std::{mem, sync::Arc};

use ethereum_types::H256;
use keccak_hash::keccak;
use log::trace;
use thiserror::Error;

use crate::{
    db::{NodeDb, StoreError},
    nibbles::Nibbles,
    node::{EncodedNode, Node, NodeDecodeError, TrieNodeType},
    EMPTY_TRIE_HASH,
};

/// Stores the result of trie operations. Returns a [`TrieError`] upon
/// failure.
pub type TrieResult<T> = Result<T, TrieError>;

/// An error type for trie operations.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TrieError {
    /// A node the traversal needs is not in the store.
    #[error("Trie node {0:x} is missing from the node store")]
    MissingNode(H256),

    /// A node fetched from the store could not be decoded.
    #[error("Trie node {hash:x} is malformed: {err}")]
    MalformedNode {
        /// Key of the offending node.
        hash: H256,
        /// What went wrong.
        err: NodeDecodeError,
    },

    /// The store itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrieError {
    /// Returns the hash of the missing node if this error is a
    /// [`TrieError::MissingNode`].
    pub fn missing_node(&self) -> Option<H256> {
        match self {
            TrieError::MissingNode(h) => Some(*h),
            _ => None,
        }
    }
}

/// A trie view over a [`NodeDb`], rooted at a given hash.
#[derive(Debug)]
pub struct StoreTrie<D> {
    db: Arc<D>,
    root: Node,
}

impl<D: NodeDb> StoreTrie<D> {
    /// Creates an empty trie backed by `db`.
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            root: Node::Empty,
        }
    }

    /// Opens the trie whose root hash is `root`. Nothing is read from the
    /// store until an operation needs it.
    pub fn at_root(db: Arc<D>, root: H256) -> Self {
        let root = match root == EMPTY_TRIE_HASH {
            true => Node::Empty,
            false => Node::Hash(root),
        };
        Self { db, root }
    }

    /// The store this trie reads from and commits to.
    pub fn db(&self) -> &Arc<D> {
        &self.db
    }

    /// Looks up `key`.
    pub fn get(&mut self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let path = Nibbles::from_bytes_be(key);
        let root = mem::take(&mut self.root);
        let (root, res) = self.with_restore(root, |this, node| this.get_at(node, &path, 0));
        self.root = root;
        res
    }

    /// Inserts `value` under `key`. An empty value removes the key, as in
    /// Ethereum.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> TrieResult<()> {
        if value.is_empty() {
            return self.remove(key).map(|_| ());
        }

        let path = Nibbles::from_bytes_be(key);
        trace!("Inserting value under {}...", path);

        let root = mem::take(&mut self.root);
        let (root, res) = self.with_restore(root, |this, node| {
            this.insert_at(node, path.clone(), value).map(|n| (n, ()))
        });
        self.root = root;
        res
    }

    /// Removes `key`, returning `true` if it had a value.
    pub fn remove(&mut self, key: &[u8]) -> TrieResult<bool> {
        let path = Nibbles::from_bytes_be(key);
        trace!("Deleting value under {} if it exists", path);

        let root = mem::take(&mut self.root);
        let (root, res) = self.with_restore(root, |this, node| this.remove_at(node, &path));
        self.root = root;
        res
    }

    /// Computes the root hash without writing anything to the store.
    pub fn hash(&self) -> H256 {
        root_ref_to_hash(self.root.encode_with(&mut |_, _| ()))
    }

    /// Writes every node of the trie to the store and returns the root hash.
    pub fn commit(&mut self) -> TrieResult<H256> {
        let mut batch = Vec::new();
        let enc = self
            .root
            .encode_with(&mut |h, bytes| batch.push((h.as_bytes().to_vec(), bytes)));

        let root = match enc {
            EncodedNode::Hashed(h) => h,
            EncodedNode::Raw(bytes) => {
                let h = keccak(&bytes);
                batch.push((h.as_bytes().to_vec(), bytes));
                h
            }
        };

        trace!("Committing {} nodes under root {:x}", batch.len(), root);
        self.db.put_batch(batch)?;
        Ok(root)
    }

    /// Runs `op` on the detached root. On error the original root is put
    /// back, so a failed operation never leaves the trie half-modified.
    fn with_restore<T>(
        &self,
        root: Node,
        op: impl FnOnce(&Self, Node) -> TrieResult<(Node, T)>,
    ) -> (Node, TrieResult<T>) {
        let backup = root.clone();
        match op(self, root) {
            Ok((node, v)) => (node, Ok(v)),
            Err(e) => (backup, Err(e)),
        }
    }

    fn resolve(&self, hash: H256) -> TrieResult<Node> {
        let bytes = self
            .db
            .get(hash.as_bytes())?
            .ok_or(TrieError::MissingNode(hash))?;
        let node =
            Node::decode(&bytes).map_err(|err| TrieError::MalformedNode { hash, err })?;
        trace!("Resolved {} node {:x}", TrieNodeType::from(&node), hash);
        Ok(node)
    }

    fn resolved(&self, node: Node) -> TrieResult<Node> {
        match node {
            Node::Hash(h) => self.resolve(h),
            n => Ok(n),
        }
    }

    fn get_at(
        &self,
        node: Node,
        path: &Nibbles,
        depth: usize,
    ) -> TrieResult<(Node, Option<Vec<u8>>)> {
        match self.resolved(node)? {
            Node::Empty => Ok((Node::Empty, None)),
            Node::Hash(_) => unreachable!("resolved nodes are never hash nodes"),
            Node::Branch {
                mut children,
                value,
            } => {
                if depth == path.len() {
                    let res = (!value.is_empty()).then(|| value.clone());
                    return Ok((Node::Branch { children, value }, res));
                }

                let nib = path.at(depth) as usize;
                trace!("Get traversed Branch (nibble: {:x})", nib);
                let (child, res) = self.get_at(mem::take(&mut children[nib]), path, depth + 1)?;
                children[nib] = child;
                Ok((Node::Branch { children, value }, res))
            }
            Node::Extension { nibbles, child } => {
                trace!("Get traversed Extension (nibbles: {:?})", nibbles);
                if !path.suffix(depth).starts_with(&nibbles) {
                    return Ok((Node::Extension { nibbles, child }, None));
                }

                let (child, res) = self.get_at(*child, path, depth + nibbles.len())?;
                Ok((
                    Node::Extension {
                        nibbles,
                        child: Box::new(child),
                    },
                    res,
                ))
            }
            Node::Leaf { nibbles, value } => {
                trace!("Get traversed Leaf (nibbles: {:?})", nibbles);
                let res = (path.suffix(depth) == nibbles).then(|| value.clone());
                Ok((Node::Leaf { nibbles, value }, res))
            }
        }
    }

    fn insert_at(&self, node: Node, path: Nibbles, value: Vec<u8>) -> TrieResult<Node> {
        match self.resolved(node)? {
            Node::Empty => {
                trace!("Insert traversed Empty");
                Ok(Node::Leaf {
                    nibbles: path,
                    value,
                })
            }
            Node::Hash(_) => unreachable!("resolved nodes are never hash nodes"),
            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return Ok(Node::Branch { children, value });
                }

                let nib = path.at(0) as usize;
                trace!("Insert traversed Branch (nibble: {:x})", nib);
                children[nib] = self.insert_at(mem::take(&mut children[nib]), path.suffix(1), value)?;
                Ok(Node::Branch {
                    children,
                    value: branch_value,
                })
            }
            Node::Extension { nibbles, child } => {
                trace!("Insert traversed Extension (nibbles: {:?})", nibbles);
                let common = nibbles.common_prefix_len(&path);

                if common == nibbles.len() {
                    let child = self.insert_at(*child, path.suffix(common), value)?;
                    return Ok(Node::Extension {
                        nibbles,
                        child: Box::new(child),
                    });
                }

                // The new key diverges inside the extension, so the extension
                // is split around a fresh branch.
                let remainder = nibbles.suffix(common + 1);
                let existing = match remainder.is_empty() {
                    true => *child,
                    false => Node::Extension {
                        nibbles: remainder,
                        child,
                    },
                };

                let mut branch = Node::empty_branch();
                place_in_branch(&mut branch, nibbles.at(common), existing);
                place_value_in_branch(&mut branch, &path, common, value);
                Ok(wrap_in_extension(path.slice(0..common), branch))
            }
            Node::Leaf {
                nibbles,
                value: leaf_value,
            } => {
                trace!("Insert traversed Leaf (nibbles: {:?})", nibbles);
                if nibbles == path {
                    return Ok(Node::Leaf { nibbles, value });
                }

                let common = nibbles.common_prefix_len(&path);
                let mut branch = Node::empty_branch();
                place_value_in_branch(&mut branch, &nibbles, common, leaf_value);
                place_value_in_branch(&mut branch, &path, common, value);
                Ok(wrap_in_extension(path.slice(0..common), branch))
            }
        }
    }

    fn remove_at(&self, node: Node, path: &Nibbles) -> TrieResult<(Node, bool)> {
        match self.resolved(node)? {
            Node::Empty => Ok((Node::Empty, false)),
            Node::Hash(_) => unreachable!("resolved nodes are never hash nodes"),
            Node::Leaf { nibbles, value } => match nibbles == *path {
                true => Ok((Node::Empty, true)),
                false => Ok((Node::Leaf { nibbles, value }, false)),
            },
            Node::Extension { nibbles, child } => {
                if !path.starts_with(&nibbles) {
                    return Ok((Node::Extension { nibbles, child }, false));
                }

                let (child, removed) = self.remove_at(*child, &path.suffix(nibbles.len()))?;
                match removed {
                    false => Ok((
                        Node::Extension {
                            nibbles,
                            child: Box::new(child),
                        },
                        false,
                    )),
                    true => Ok((self.collapse_extension(nibbles, child)?, true)),
                }
            }
            Node::Branch {
                mut children,
                mut value,
            } => {
                if path.is_empty() {
                    if value.is_empty() {
                        return Ok((Node::Branch { children, value }, false));
                    }
                    value.clear();
                } else {
                    let nib = path.at(0) as usize;
                    let (child, removed) =
                        self.remove_at(mem::take(&mut children[nib]), &path.suffix(1))?;
                    children[nib] = child;
                    if !removed {
                        return Ok((Node::Branch { children, value }, false));
                    }
                }

                Ok((self.collapse_branch(children, value)?, true))
            }
        }
    }

    /// Restores the canonical shape of a branch after one of its entries was
    /// removed. A branch left with a single child is merged into it, which
    /// requires fetching that child if it was never resolved.
    fn collapse_branch(&self, mut children: Box<[Node; 16]>, value: Vec<u8>) -> TrieResult<Node> {
        let mut live = children
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(|(i, _)| i);
        let first = live.next();
        let more_than_one = live.next().is_some();

        match (first, more_than_one, value.is_empty()) {
            (None, _, true) => Ok(Node::Empty),
            (None, _, false) => Ok(Node::Leaf {
                nibbles: Nibbles::default(),
                value,
            }),
            (Some(idx), false, true) => {
                let only = self.resolved(mem::take(&mut children[idx]))?;
                trace!("Collapsing Branch into its only child ({})", TrieNodeType::from(&only));
                let prefix = Nibbles::from_nibbles([idx as u8]);
                self.collapse_extension(prefix, only)
            }
            _ => Ok(Node::Branch { children, value }),
        }
    }

    /// Merges `prefix` into `child` where the trie shape requires it.
    fn collapse_extension(&self, prefix: Nibbles, child: Node) -> TrieResult<Node> {
        Ok(match self.resolved(child)? {
            Node::Empty => Node::Empty,
            Node::Hash(_) => unreachable!("resolved nodes are never hash nodes"),
            Node::Leaf { nibbles, value } => Node::Leaf {
                nibbles: prefix.join(&nibbles),
                value,
            },
            Node::Extension { nibbles, child } => Node::Extension {
                nibbles: prefix.join(&nibbles),
                child,
            },
            branch @ Node::Branch { .. } => Node::Extension {
                nibbles: prefix,
                child: Box::new(branch),
            },
        })
    }
}

fn place_in_branch(branch: &mut Node, nib: u8, node: Node) {
    if let Node::Branch { children, .. } = branch {
        children[nib as usize] = node;
    }
}

/// Puts `value` (stored under `path`) into `branch`, which sits `depth`
/// nibbles down `path`.
fn place_value_in_branch(branch: &mut Node, path: &Nibbles, depth: usize, value: Vec<u8>) {
    let Node::Branch {
        children,
        value: branch_value,
    } = branch
    else {
        return;
    };

    match depth == path.len() {
        true => *branch_value = value,
        false => {
            children[path.at(depth) as usize] = Node::Leaf {
                nibbles: path.suffix(depth + 1),
                value,
            }
        }
    }
}

fn wrap_in_extension(prefix: Nibbles, node: Node) -> Node {
    match prefix.is_empty() {
        true => node,
        false => Node::Extension {
            nibbles: prefix,
            child: Box::new(node),
        },
    }
}

fn root_ref_to_hash(enc: EncodedNode) -> H256 {
    match enc {
        EncodedNode::Hashed(h) => h,
        EncodedNode::Raw(bytes) => keccak(bytes),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use eth_trie::{EthTrie, MemoryDB, Trie};
    use ethereum_types::H256;

    use super::*;
    use crate::{
        db::MemNodeDb,
        testing_utils::{common_setup, generate_n_random_entries, trie_from_entries},
    };

    fn eth_trie_root(entries: &[(Vec<u8>, Vec<u8>)]) -> H256 {
        let mut truth = EthTrie::new(Arc::new(MemoryDB::new(true)));
        for (k, v) in entries {
            truth.insert(k, v).unwrap();
        }
        H256(truth.root_hash().unwrap().0)
    }

    #[test]
    fn empty_trie_hashes_to_empty_root() {
        let trie = StoreTrie::new(Arc::new(MemNodeDb::new()));
        assert_eq!(trie.hash(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn inserted_values_are_retrievable() {
        common_setup();
        let entries = generate_n_random_entries(200, 1);
        let (mut trie, _) = trie_from_entries(&entries);

        for (k, v) in &entries {
            assert_eq!(trie.get(k).unwrap().as_ref(), Some(v));
        }
        assert_eq!(trie.get(&[0xff; 32]).unwrap(), None);
    }

    #[test]
    fn hashes_agree_with_eth_trie() {
        common_setup();
        for seed in 0..4 {
            let entries = generate_n_random_entries(300, seed);
            let (trie, _) = trie_from_entries(&entries);
            assert_eq!(trie.hash(), eth_trie_root(&entries));
        }
    }

    #[test]
    fn variable_length_keys_agree_with_eth_trie() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"do".to_vec(), b"verb".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"doge".to_vec(), b"coin".to_vec()),
            (b"horse".to_vec(), b"stallion".to_vec()),
        ];
        let (trie, _) = trie_from_entries(&entries);
        assert_eq!(trie.hash(), eth_trie_root(&entries));
    }

    #[test]
    fn reopened_trie_reads_through_the_store() {
        let entries = generate_n_random_entries(64, 7);
        let (mut trie, db) = trie_from_entries(&entries);
        let root = trie.commit().unwrap();

        let mut reopened = StoreTrie::at_root(db, root);
        for (k, v) in &entries {
            assert_eq!(reopened.get(k).unwrap().as_ref(), Some(v));
        }
        assert_eq!(reopened.commit().unwrap(), root);
    }

    #[test]
    fn deleting_restores_the_previous_root() {
        common_setup();
        let entries = generate_n_random_entries(100, 3);
        let (mut without_tail, db) = trie_from_entries(&entries[..60]);
        let expected = without_tail.commit().unwrap();

        let mut trie = StoreTrie::at_root(db, expected);
        for (k, v) in &entries[60..] {
            trie.insert(k, v.clone()).unwrap();
        }
        trie.commit().unwrap();

        for (k, _) in &entries[60..] {
            assert!(trie.remove(k).unwrap());
        }
        assert!(!trie.remove(&entries[70].0).unwrap());
        assert_eq!(trie.commit().unwrap(), expected);
    }

    #[test]
    fn deleting_everything_yields_the_empty_root() {
        let entries = generate_n_random_entries(20, 11);
        let (mut trie, _) = trie_from_entries(&entries);
        for (k, _) in &entries {
            trie.remove(k).unwrap();
        }
        assert_eq!(trie.hash(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn inserting_an_empty_value_deletes() {
        let entries = generate_n_random_entries(10, 5);
        let (mut trie, _) = trie_from_entries(&entries[..9]);
        let expected = trie.hash();

        trie.insert(&entries[9].0, entries[9].1.clone()).unwrap();
        trie.insert(&entries[9].0, Vec::new()).unwrap();
        assert_eq!(trie.hash(), expected);
    }

    #[test]
    fn missing_nodes_are_reported_and_leave_the_trie_intact() {
        let entries = generate_n_random_entries(50, 9);
        let (mut trie, db) = trie_from_entries(&entries);
        let root = trie.commit().unwrap();

        // Keep only the root node.
        let pruned = MemNodeDb::new();
        pruned
            .put(root.as_bytes(), db.get(root.as_bytes()).unwrap().unwrap())
            .unwrap();

        let mut partial = StoreTrie::at_root(Arc::new(pruned), root);
        let err = partial.get(&entries[0].0).unwrap_err();
        assert!(err.missing_node().is_some());
        assert_eq!(partial.hash(), root);
    }

    #[test]
    fn nodes_are_fetched_once_per_trie() {
        let entries = generate_n_random_entries(30, 2);
        let (mut trie, db) = trie_from_entries(&entries);
        let root = trie.commit().unwrap();

        let mut reopened = StoreTrie::at_root(db.clone(), root);
        reopened.get(&entries[0].0).unwrap();

        // Dropping the root from the store does not matter any more, it has
        // been resolved already.
        db.remove(root.as_bytes());
        assert_eq!(reopened.get(&entries[0].0).unwrap().as_ref(), Some(&entries[0].1));
    }
}
