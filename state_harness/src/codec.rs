//! The binary block body handed to stateless validators.
//!
//! A block body is the RLP list
//! `[[sender, nonce, gasPrice, gasLimit, to, value, data], [node, ...]]`
//! where the witness nodes appear in ascending order of their hash and `to`
//! is the empty string for contract creation.

use bytes::Bytes;
use ethereum_types::{Address, U256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::{transaction::Transaction, witness::WitnessSet};

/// The seven transaction fields a stateless validator needs, with the
/// sender already recovered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxTuple {
    pub sender: Address,
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
}

impl TxTuple {
    pub fn new(sender: Address, tx: &Transaction) -> Self {
        Self {
            sender,
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
        }
    }
}

impl Encodable for TxTuple {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(7);
        s.append(&self.sender);
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        match &self.to {
            Some(to) => s.append(to),
            None => s.append_empty_data(),
        };
        s.append(&self.value);
        s.append(&self.data);
    }
}

impl Decodable for TxTuple {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 7 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        let to = rlp.at(4)?;
        Ok(Self {
            sender: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            gas_price: rlp.val_at(2)?,
            gas_limit: rlp.val_at(3)?,
            to: match to.is_empty() {
                true => None,
                false => Some(to.as_val()?),
            },
            value: rlp.val_at(5)?,
            data: rlp.val_at(6)?,
        })
    }
}

/// A decoded block body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockBody {
    pub tx: TxTuple,
    /// Witness nodes, in the order they were encoded.
    pub nodes: Vec<Vec<u8>>,
}

impl BlockBody {
    /// Rebuilds the witness by keying every node under its hash.
    pub fn witness_set(&self) -> WitnessSet {
        WitnessSet::from_nodes(self.nodes.iter().cloned())
    }
}

pub fn encode_block_body(tx: &TxTuple, witness: &WitnessSet) -> Bytes {
    let mut s = RlpStream::new_list(2);
    s.append(tx);
    s.begin_list(witness.len());
    for node in witness.nodes() {
        s.append(&node);
    }
    s.out().freeze()
}

pub fn decode_block_body(bytes: &[u8]) -> Result<BlockBody, DecoderError> {
    let rlp = Rlp::new(bytes);
    if rlp.item_count()? != 2 {
        return Err(DecoderError::RlpIncorrectListLen);
    }
    Ok(BlockBody {
        tx: rlp.val_at(0)?,
        nodes: rlp.list_at(1)?,
    })
}
