//! Everything an execution needs besides the transaction and the state: the
//! fork rules in effect and the block the transaction is included in.

use ethereum_types::{Address, H256, U256};
use serde::Deserialize;
use strum::{Display, EnumIter, EnumString};

use crate::hex;

/// A named ruleset version of the execution semantics.
///
/// Parsing accepts the names used as keys of a fixture's `post` section
/// (`"EIP150"` for Tangerine Whistle, `"EIP158"` for Spurious Dragon) as well
/// as the lowercase hardfork names.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
#[strum(ascii_case_insensitive)]
pub enum Fork {
    Frontier,
    Homestead,
    #[strum(to_string = "EIP150", serialize = "TangerineWhistle")]
    TangerineWhistle,
    #[strum(to_string = "EIP158", serialize = "SpuriousDragon")]
    SpuriousDragon,
    Byzantium,
    Constantinople,
    #[strum(to_string = "Petersburg", serialize = "ConstantinopleFix")]
    Petersburg,
    Istanbul,
}

/// Fork switches handed to the execution engine with every call.
///
/// Engines read their rules from here instead of having them patched onto
/// the transaction or block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutionContext {
    /// The fork whose post-state roots are being checked.
    pub fork: Fork,
    /// Apply Homestead transaction rules (contract creation cost, signature
    /// malleability checks). State tests always run with these on.
    pub homestead: bool,
    /// Remove touched accounts that end up empty (EIP-158/161).
    pub eip158: bool,
}

impl ExecutionContext {
    /// The context state tests use for `fork`.
    pub fn for_fork(fork: Fork) -> Self {
        Self {
            fork,
            homestead: true,
            eip158: fork >= Fork::SpuriousDragon,
        }
    }

    /// Gas charged per non-zero byte of transaction data.
    pub fn tx_data_non_zero_gas(&self) -> u64 {
        match self.fork >= Fork::Istanbul {
            true => 16,
            false => 68,
        }
    }
}

/// The block environment (`env` section of a fixture).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct BlockContext {
    /// The beneficiary credited with transaction fees.
    #[serde(rename = "currentCoinbase", deserialize_with = "hex::address")]
    pub coinbase: Address,
    #[serde(rename = "currentDifficulty", deserialize_with = "hex::quantity")]
    pub difficulty: U256,
    #[serde(rename = "currentGasLimit", deserialize_with = "hex::quantity")]
    pub gas_limit: U256,
    #[serde(rename = "currentNumber", deserialize_with = "hex::quantity")]
    pub number: U256,
    #[serde(rename = "currentTimestamp", deserialize_with = "hex::quantity")]
    pub timestamp: U256,
    #[serde(default, rename = "previousHash", deserialize_with = "hex::h256")]
    pub previous_hash: H256,
}
