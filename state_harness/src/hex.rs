//! Serde helpers for the `0x`-prefixed strings used throughout state test
//! fixtures and the artifacts written for them.
//!
//! Fixtures are not consistent about prefixes, and quantities are sometimes
//! written in decimal, so every helper accepts both.

use std::collections::BTreeMap;

use ethereum_types::{Address, H256, U256};
use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

pub fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: hex::ToHex,
{
    let s = data.encode_hex::<String>();
    serializer.serialize_str(&format!("0x{}", s))
}

pub fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
where
    T: hex::FromHex,
    T::Error: std::fmt::Display,
{
    let s = String::deserialize(deserializer)?;
    T::from_hex(strip(&s)).map_err(D::Error::custom)
}

pub fn h256<'de, D: Deserializer<'de>>(it: D) -> Result<H256, D::Error> {
    Ok(H256(deserialize(it)?))
}

pub fn serialize_h256<S: Serializer>(h: &H256, serializer: S) -> Result<S::Ok, S::Error> {
    serialize(h.as_bytes(), serializer)
}

pub fn address<'de, D: Deserializer<'de>>(it: D) -> Result<Address, D::Error> {
    let s = String::deserialize(it)?;
    parse_address(&s).map_err(D::Error::custom)
}

/// An empty string stands for "no address" (contract creation).
pub fn opt_address<'de, D: Deserializer<'de>>(it: D) -> Result<Option<Address>, D::Error> {
    let s = String::deserialize(it)?;
    match strip(&s).is_empty() {
        true => Ok(None),
        false => parse_address(&s).map(Some).map_err(D::Error::custom),
    }
}

pub fn quantity<'de, D: Deserializer<'de>>(it: D) -> Result<U256, D::Error> {
    let s = String::deserialize(it)?;
    parse_quantity(&s).map_err(D::Error::custom)
}

pub fn quantities<'de, D: Deserializer<'de>>(it: D) -> Result<Vec<U256>, D::Error> {
    Vec::<String>::deserialize(it)?
        .iter()
        .map(|s| parse_quantity(s).map_err(D::Error::custom))
        .collect()
}

pub fn byte_seq<'de, D: Deserializer<'de>>(it: D) -> Result<Vec<Vec<u8>>, D::Error> {
    Vec::<String>::deserialize(it)?
        .iter()
        .map(|s| hex::decode(strip(s)).map_err(D::Error::custom))
        .collect()
}

pub fn storage<'de, D: Deserializer<'de>>(it: D) -> Result<BTreeMap<U256, U256>, D::Error> {
    BTreeMap::<String, String>::deserialize(it)?
        .iter()
        .map(|(k, v)| {
            Ok((
                parse_quantity(k).map_err(D::Error::custom)?,
                parse_quantity(v).map_err(D::Error::custom)?,
            ))
        })
        .collect()
}

pub fn parse_address(s: &str) -> Result<Address, String> {
    let bytes = hex::decode(strip(s)).map_err(|e| format!("invalid address {:?}: {}", s, e))?;
    match bytes.len() {
        20 => Ok(Address::from_slice(&bytes)),
        n => Err(format!("invalid address {:?}: expected 20 bytes, got {}", s, n)),
    }
}

/// Parses `0x`-prefixed hex or plain decimal. `"0x"` and `""` are zero.
pub fn parse_quantity(s: &str) -> Result<U256, String> {
    let parsed = match s.strip_prefix("0x") {
        Some("") => return Ok(U256::zero()),
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("{:?}", e)),
        None if s.is_empty() => return Ok(U256::zero()),
        None => U256::from_dec_str(s).map_err(|e| format!("{:?}", e)),
    };
    parsed.map_err(|e| format!("invalid quantity {:?}: {}", s, e))
}

fn strip(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}
