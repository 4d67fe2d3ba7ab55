//! Trie nodes and their RLP encoding.
//!
//! A child reference inside a branch or extension is either the keccak hash
//! of the child's encoding, or, if that encoding is shorter than 32 bytes, the
//! encoding itself inlined into the parent. Only hashed nodes ever get their
//! own entry in a [`NodeDb`](crate::db::NodeDb).

use std::fmt::{self, Display};

use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};
use thiserror::Error;

use crate::nibbles::{FromHexPrefixError, Nibbles};

/// An error raised while decoding a node fetched from the store.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum NodeDecodeError {
    /// The bytes are not valid RLP.
    #[error("Invalid node RLP: {0}")]
    Rlp(#[from] DecoderError),

    /// A leaf or extension path is malformed.
    #[error(transparent)]
    Path(#[from] FromHexPrefixError),

    /// The RLP list has neither 2 nor 17 items.
    #[error("A trie node must be a list of 2 or 17 items (got {0})")]
    UnexpectedItemCount(usize),

    /// A child reference is neither empty, a 32 byte hash nor an inline node.
    #[error("Invalid child reference of {0} bytes")]
    InvalidChildRef(usize),
}

/// A node of a [`StoreTrie`](crate::trie::StoreTrie).
///
/// [`Node::Hash`] is a child that has not been fetched from the store yet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Node {
    /// An empty trie.
    #[default]
    Empty,
    /// A reference to a node that still lives only in the store.
    Hash(H256),
    /// A branch node, which consists of 16 children and an optional value.
    Branch {
        /// The 16 children of this branch node.
        children: Box<[Node; 16]>,
        /// The payload of this node. Empty means "no value".
        value: Vec<u8>,
    },
    /// An extension node, which consists of a list of nibbles and a single
    /// child.
    Extension {
        /// The path of this extension.
        nibbles: Nibbles,
        /// The child of this extension node.
        child: Box<Node>,
    },
    /// A leaf node, which consists of a list of nibbles and a value.
    Leaf {
        /// The path of this leaf node.
        nibbles: Nibbles,
        /// The payload of this node.
        value: Vec<u8>,
    },
}

/// How a node is referenced from its parent.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EncodedNode {
    /// Node that is RLPed but not hashed (encoding shorter than 32 bytes).
    Raw(Vec<u8>),
    /// Node that is hashed.
    Hashed(H256),
}

impl Node {
    /// A branch with no children and no value.
    pub fn empty_branch() -> Self {
        Node::Branch {
            children: Box::new(std::array::from_fn(|_| Node::Empty)),
            value: Vec::new(),
        }
    }

    /// Returns `true` for [`Node::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Encodes this node, handing every node whose encoding is at least 32
    /// bytes to `sink` as `(hash, encoding)` before returning the reference
    /// the parent should embed.
    ///
    /// Unresolved [`Node::Hash`] children are referenced as-is and never
    /// re-emitted.
    pub fn encode_with(&self, sink: &mut impl FnMut(H256, Vec<u8>)) -> EncodedNode {
        match self {
            Node::Empty => EncodedNode::Raw(rlp::NULL_RLP.to_vec()),
            Node::Hash(h) => EncodedNode::Hashed(*h),
            Node::Branch { children, value } => {
                let mut stream = RlpStream::new_list(17);
                for c in children.iter() {
                    append_child_ref(&mut stream, c.encode_with(sink));
                }
                match value.is_empty() {
                    false => stream.append(value),
                    true => stream.append_empty_data(),
                };
                hash_if_large_enough(stream.out().to_vec(), sink)
            }
            Node::Extension { nibbles, child } => {
                let mut stream = RlpStream::new_list(2);
                stream.append(&nibbles.to_hex_prefix_encoding(false));
                append_child_ref(&mut stream, child.encode_with(sink));
                hash_if_large_enough(stream.out().to_vec(), sink)
            }
            Node::Leaf { nibbles, value } => {
                let mut stream = RlpStream::new_list(2);
                stream.append(&nibbles.to_hex_prefix_encoding(true));
                stream.append(value);
                hash_if_large_enough(stream.out().to_vec(), sink)
            }
        }
    }

    /// Decodes a node from its full RLP encoding (as stored in a
    /// [`NodeDb`](crate::db::NodeDb) or inlined into a parent).
    pub fn decode(bytes: &[u8]) -> Result<Self, NodeDecodeError> {
        decode_rlp(&Rlp::new(bytes))
    }
}

fn decode_rlp(rlp: &Rlp) -> Result<Node, NodeDecodeError> {
    if rlp.is_data() && rlp.is_empty() {
        return Ok(Node::Empty);
    }

    match rlp.item_count()? {
        2 => {
            let (nibbles, is_leaf) = Nibbles::from_hex_prefix_encoding(rlp.at(0)?.data()?)?;
            match is_leaf {
                true => Ok(Node::Leaf {
                    nibbles,
                    value: rlp.at(1)?.data()?.to_vec(),
                }),
                false => Ok(Node::Extension {
                    nibbles,
                    child: Box::new(decode_child_ref(&rlp.at(1)?)?),
                }),
            }
        }
        17 => {
            let mut children: [Node; 16] = std::array::from_fn(|_| Node::Empty);
            for (i, child) in children.iter_mut().enumerate() {
                *child = decode_child_ref(&rlp.at(i)?)?;
            }
            Ok(Node::Branch {
                children: Box::new(children),
                value: rlp.at(16)?.data()?.to_vec(),
            })
        }
        n => Err(NodeDecodeError::UnexpectedItemCount(n)),
    }
}

fn decode_child_ref(rlp: &Rlp) -> Result<Node, NodeDecodeError> {
    if rlp.is_list() {
        return decode_rlp(rlp);
    }

    let data = rlp.data()?;
    match data.len() {
        0 => Ok(Node::Empty),
        32 => Ok(Node::Hash(H256::from_slice(data))),
        n => Err(NodeDecodeError::InvalidChildRef(n)),
    }
}

fn hash_if_large_enough(bytes: Vec<u8>, sink: &mut impl FnMut(H256, Vec<u8>)) -> EncodedNode {
    match bytes.len() >= 32 {
        false => EncodedNode::Raw(bytes),
        true => {
            let h = keccak(&bytes);
            sink(h, bytes);
            EncodedNode::Hashed(h)
        }
    }
}

fn append_child_ref(s: &mut RlpStream, node: EncodedNode) {
    match node {
        EncodedNode::Raw(b) => s.append_raw(&b, 1),
        EncodedNode::Hashed(h) => s.append(&h.as_bytes()),
    };
}

/// Simplified node type to make logging cleaner.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrieNodeType {
    /// Empty node.
    Empty,
    /// Unresolved node.
    Hash,
    /// Branch node.
    Branch,
    /// Extension node.
    Extension,
    /// Leaf node.
    Leaf,
}

impl From<&Node> for TrieNodeType {
    fn from(node: &Node) -> Self {
        match node {
            Node::Empty => Self::Empty,
            Node::Hash(_) => Self::Hash,
            Node::Branch { .. } => Self::Branch,
            Node::Extension { .. } => Self::Extension,
            Node::Leaf { .. } => Self::Leaf,
        }
    }
}

impl Display for TrieNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrieNodeType::Empty => "Empty",
            TrieNodeType::Hash => "Hash",
            TrieNodeType::Branch => "Branch",
            TrieNodeType::Extension => "Extension",
            TrieNodeType::Leaf => "Leaf",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &[u8], value: &[u8]) -> Node {
        Node::Leaf {
            nibbles: Nibbles::from_nibbles(path.iter().copied()),
            value: value.to_vec(),
        }
    }

    fn encode_collecting(node: &Node) -> (EncodedNode, Vec<(H256, Vec<u8>)>) {
        let mut out = Vec::new();
        let enc = node.encode_with(&mut |h, b| out.push((h, b)));
        (enc, out)
    }

    #[test]
    fn small_nodes_are_inlined() {
        let (enc, emitted) = encode_collecting(&leaf(&[1, 2], b"v"));
        assert!(matches!(enc, EncodedNode::Raw(_)));
        assert!(emitted.is_empty());
    }

    #[test]
    fn large_nodes_are_hashed_and_emitted() {
        let (enc, emitted) = encode_collecting(&leaf(&[1, 2], &[0xaa; 40]));
        let EncodedNode::Hashed(h) = enc else {
            panic!("expected a hashed node");
        };
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, h);
        assert_eq!(keccak(&emitted[0].1), h);
    }

    #[test]
    fn branch_with_inline_and_hashed_children_round_trips() {
        let mut branch = Node::empty_branch();
        if let Node::Branch { children, value } = &mut branch {
            children[3] = leaf(&[5], b"small");
            children[9] = Node::Hash(H256::repeat_byte(0x42));
            *value = b"branch value".to_vec();
        }

        let (enc, emitted) = encode_collecting(&branch);
        let EncodedNode::Hashed(h) = enc else {
            panic!("a branch with a hash child is always >= 32 bytes");
        };
        let (_, bytes) = emitted.into_iter().find(|(k, _)| *k == h).unwrap();

        assert_eq!(Node::decode(&bytes).unwrap(), branch);
    }

    #[test]
    fn extension_round_trips() {
        let ext = Node::Extension {
            nibbles: Nibbles::from_nibbles([0xa, 0xb, 0xc]),
            child: Box::new(Node::Hash(H256::repeat_byte(1))),
        };
        let (enc, emitted) = encode_collecting(&ext);
        assert!(matches!(enc, EncodedNode::Hashed(_)));
        assert_eq!(Node::decode(&emitted[0].1).unwrap(), ext);
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut s = RlpStream::new_list(3);
        s.append(&1u8).append(&2u8).append(&3u8);
        assert_eq!(
            Node::decode(&s.out()),
            Err(NodeDecodeError::UnexpectedItemCount(3))
        );
    }
}
