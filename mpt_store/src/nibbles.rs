//! Define [`Nibbles`] and the hex prefix ("compact") encoding used for
//! leaf and extension paths.

use std::{
    fmt::{self, Debug, Display},
    ops::Range,
};

use thiserror::Error;

/// A Nibble has 4 bits and is stored as `u8`.
pub type Nibble = u8;

/// Errors encountered when decoding a hex prefix encoded path.
#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
pub enum FromHexPrefixError {
    #[error("Tried to decode an empty hex prefix byte string")]
    /// There was no flag byte.
    Empty,

    #[error("Tried to convert a hex prefix byte string into `Nibbles` with invalid flags at the start: {0:#04b}")]
    /// The hex prefix encoding flag is invalid.
    InvalidFlags(Nibble),
}

/// A path through a trie, one nibble per element.
///
/// Keys in the tries this crate builds are at most 32 bytes, so a plain
/// vector is plenty.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Nibbles {
    nibs: Vec<Nibble>,
}

impl Nibbles {
    /// Splits every byte into its high and low nibble.
    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        let nibs = bytes.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect();
        Self { nibs }
    }

    /// Builds a path from raw nibble values.
    ///
    /// # Panics
    /// If any value is greater than 15.
    pub fn from_nibbles(nibs: impl IntoIterator<Item = Nibble>) -> Self {
        let nibs: Vec<_> = nibs.into_iter().collect();
        assert!(
            nibs.iter().all(|n| *n < 16),
            "Attempted to build a nibble sequence containing a value greater than 15!"
        );
        Self { nibs }
    }

    /// Number of nibbles.
    pub fn len(&self) -> usize {
        self.nibs.len()
    }

    /// Returns `true` for the empty path.
    pub fn is_empty(&self) -> bool {
        self.nibs.is_empty()
    }

    /// The nibble at `idx`.
    pub fn at(&self, idx: usize) -> Nibble {
        self.nibs[idx]
    }

    /// A copy of the nibbles in `range`.
    pub fn slice(&self, range: Range<usize>) -> Nibbles {
        Self {
            nibs: self.nibs[range].to_vec(),
        }
    }

    /// Everything from `idx` onwards.
    pub fn suffix(&self, idx: usize) -> Nibbles {
        self.slice(idx..self.len())
    }

    /// Length of the prefix both paths share.
    pub fn common_prefix_len(&self, other: &Nibbles) -> usize {
        self.nibs
            .iter()
            .zip(other.nibs.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Returns `true` if `self` begins with `prefix`.
    pub fn starts_with(&self, prefix: &Nibbles) -> bool {
        self.nibs.starts_with(&prefix.nibs)
    }

    /// A new path made of `nib` followed by `self`.
    pub fn prepend(&self, nib: Nibble) -> Nibbles {
        let mut nibs = Vec::with_capacity(self.len() + 1);
        nibs.push(nib);
        nibs.extend_from_slice(&self.nibs);
        Self { nibs }
    }

    /// A new path made of `self` followed by `post`.
    pub fn join(&self, post: &Nibbles) -> Nibbles {
        let mut nibs = self.nibs.clone();
        nibs.extend_from_slice(&post.nibs);
        Self { nibs }
    }

    /// Converts [`Nibbles`] to hex-prefix encoding (AKA "compact").
    ///
    /// The high nibble of the first byte carries two flags: bit 0 is set if
    /// the path has an odd length and bit 1 is set for leaf nodes. Odd paths
    /// put their first nibble into the low half of the flag byte.
    pub fn to_hex_prefix_encoding(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.len() % 2 == 1;
        let flags = ((is_leaf as u8) << 1 | odd as u8) << 4;

        let mut out = Vec::with_capacity(self.len() / 2 + 1);
        let rest = match odd {
            true => {
                out.push(flags | self.nibs[0]);
                &self.nibs[1..]
            }
            false => {
                out.push(flags);
                &self.nibs[..]
            }
        };

        out.extend(rest.chunks(2).map(|pair| pair[0] << 4 | pair[1]));
        out
    }

    /// Decodes a hex prefix byte string, returning the path and whether it
    /// belonged to a leaf.
    pub fn from_hex_prefix_encoding(bytes: &[u8]) -> Result<(Self, bool), FromHexPrefixError> {
        let first = *bytes.first().ok_or(FromHexPrefixError::Empty)?;
        let flag_bits = first >> 4;

        // is_odd --> 0b01
        // is_leaf --> 0b10
        let (is_leaf, odd) = match flag_bits {
            0b00 => (false, false),
            0b01 => (false, true),
            0b10 => (true, false),
            0b11 => (true, true),
            _ => return Err(FromHexPrefixError::InvalidFlags(flag_bits)),
        };

        let mut nibs = Vec::with_capacity(bytes.len() * 2);
        if odd {
            nibs.push(first & 0x0f);
        }
        nibs.extend(bytes[1..].iter().flat_map(|b| [b >> 4, b & 0x0f]));

        Ok((Self { nibs }, is_leaf))
    }
}

impl Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for n in &self.nibs {
            write!(f, "{:x}", n)?;
        }
        Ok(())
    }
}

impl Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
