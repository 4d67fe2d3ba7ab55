//! Concrete transactions, sender recovery and static validation.

use ethereum_types::{Address, H256, U256};
use k256::{elliptic_curve::sec1::ToEncodedPoint, SecretKey};
use keccak_hash::keccak;
use thiserror::Error;

use crate::context::ExecutionContext;

const TX_BASE_GAS: u64 = 21_000;
const TX_CREATE_GAS: u64 = 32_000;
const TX_DATA_ZERO_GAS: u64 = 4;

/// Why a transaction was rejected before it reached the engine.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ValidationError {
    #[error("Malformed signature: secret key {0:x} is not a valid secp256k1 scalar")]
    MalformedSignature(H256),

    #[error("Gas limit {gas_limit} is below the intrinsic gas {intrinsic}")]
    IntrinsicGasTooLow { gas_limit: U256, intrinsic: u64 },
}

/// A fully instantiated transaction: one combination of the data, gas and
/// value variants of a fixture's transaction template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    /// State tests sign implicitly: the fixture carries the sender's key.
    pub secret_key: H256,
}

impl Transaction {
    /// Derives the sender address from the secret key.
    pub fn sender(&self) -> Result<Address, ValidationError> {
        let key = SecretKey::from_slice(self.secret_key.as_bytes())
            .map_err(|_| ValidationError::MalformedSignature(self.secret_key))?;
        let point = key.public_key().to_encoded_point(false);
        // Skip the 0x04 tag of the uncompressed SEC1 encoding.
        let hash = keccak(&point.as_bytes()[1..]);
        Ok(Address::from_slice(&hash.as_bytes()[12..]))
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Gas charged before the first instruction runs.
    pub fn intrinsic_gas(&self, ctx: &ExecutionContext) -> u64 {
        let non_zero_gas = ctx.tx_data_non_zero_gas();
        let data_gas: u64 = self
            .data
            .iter()
            .map(|b| match b {
                0 => TX_DATA_ZERO_GAS,
                _ => non_zero_gas,
            })
            .sum();
        let create_gas = match self.is_create() && ctx.homestead {
            true => TX_CREATE_GAS,
            false => 0,
        };
        TX_BASE_GAS + data_gas + create_gas
    }

    /// Checks that do not need any state: the signature yields a sender and
    /// the gas limit covers the intrinsic gas. Returns the sender.
    pub fn validate(&self, ctx: &ExecutionContext) -> Result<Address, ValidationError> {
        let sender = self.sender()?;
        let intrinsic = self.intrinsic_gas(ctx);
        if self.gas_limit < U256::from(intrinsic) {
            return Err(ValidationError::IntrinsicGasTooLow {
                gas_limit: self.gas_limit,
                intrinsic,
            });
        }
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::context::Fork;

    fn transfer() -> Transaction {
        Transaction {
            nonce: U256::zero(),
            gas_price: 1.into(),
            gas_limit: 21_000.into(),
            to: Some(Address::repeat_byte(0xbb)),
            value: 10.into(),
            data: vec![],
            secret_key: H256(hex!(
                "45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8"
            )),
        }
    }

    #[test]
    fn sender_is_derived_from_the_secret_key() {
        assert_eq!(
            transfer().sender(),
            Ok(Address::from(hex!("a94f5374fce5edbc8e2a8697c15331677e6ebf0b")))
        );
    }

    #[test]
    fn zero_and_oversized_keys_are_malformed() {
        for key in [H256::zero(), H256::repeat_byte(0xff)] {
            let tx = Transaction {
                secret_key: key,
                ..transfer()
            };
            assert_eq!(tx.sender(), Err(ValidationError::MalformedSignature(key)));
        }
    }

    #[test]
    fn intrinsic_gas_depends_on_data_and_fork() {
        let tx = Transaction {
            data: vec![0, 1, 0, 2],
            ..transfer()
        };
        let frontier = ExecutionContext::for_fork(Fork::Frontier);
        let istanbul = ExecutionContext::for_fork(Fork::Istanbul);
        assert_eq!(tx.intrinsic_gas(&frontier), 21_000 + 2 * 4 + 2 * 68);
        assert_eq!(tx.intrinsic_gas(&istanbul), 21_000 + 2 * 4 + 2 * 16);

        let create = Transaction {
            to: None,
            ..transfer()
        };
        assert_eq!(create.intrinsic_gas(&istanbul), 53_000);
    }

    #[test]
    fn validation_rejects_insufficient_gas() {
        let ctx = ExecutionContext::for_fork(Fork::Byzantium);
        assert!(transfer().validate(&ctx).is_ok());

        let tx = Transaction {
            gas_limit: 20_999.into(),
            ..transfer()
        };
        assert_eq!(
            tx.validate(&ctx),
            Err(ValidationError::IntrinsicGasTooLow {
                gas_limit: 20_999.into(),
                intrinsic: 21_000,
            })
        );
    }
}
