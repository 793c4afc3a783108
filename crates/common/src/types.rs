//! Chain primitive types.
//!
//! These mirror the on-chain representations of a Bitcoin-derivative chain:
//! 32-byte hashes displayed in reversed hex, transaction outpoints ordered
//! by `(txid, n)`, and integer satoshi amounts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One coin, in satoshis.
pub const COIN: i64 = 100_000_000;

/// Errors from parsing primitive types out of their string forms.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The input decoded to the wrong number of bytes.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A 256-bit hash.
///
/// Displayed and parsed as byte-reversed hex, matching the convention used
/// by Bitcoin-derivative chains for txids and proof ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Raw little-endian bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from byte-reversed hex.
    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(ParseError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; 32];
        for (i, b) in bytes.iter().rev().enumerate() {
            out[i] = *b;
        }
        Ok(Hash256(out))
    }

    /// Byte-reversed hex string.
    pub fn to_hex(&self) -> String {
        let mut rev = self.0;
        rev.reverse();
        hex::encode(rev)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A transaction identifier.
pub type TxId = Hash256;

/// A reference to a transaction output.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Outpoint {
    /// The transaction holding the output.
    pub txid: TxId,
    /// The output index within that transaction.
    pub n: u32,
}

impl Outpoint {
    pub fn new(txid: TxId, n: u32) -> Self {
        Self { txid, n }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.n)
    }
}

/// A monetary amount in satoshis.
///
/// Signed to match the chain convention; negative amounts never appear in
/// valid coins but keep fee arithmetic total.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_sats(sats: i64) -> Self {
        Amount(sats)
    }

    /// Whole coins, e.g. `Amount::from_coins(5)` is 5 * [`COIN`] satoshis.
    pub const fn from_coins(coins: i64) -> Self {
        Amount(coins * COIN)
    }

    pub const fn sats(&self) -> i64 {
        self.0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Saturating sum, for aggregate reporting.
    pub fn saturating_add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / COIN;
        let frac = (self.0 % COIN).abs();
        write!(f, "{}.{:08}", whole, frac)
    }
}

/// A compressed secp256k1 public key, kept as opaque bytes.
///
/// Key validation and signature checks happen outside this workspace; the
/// avalanche subsystem only compares and displays keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubKey(pub [u8; 33]);

impl PubKey {
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 33 {
            return Err(ParseError::InvalidLength {
                expected: 33,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; 33];
        out.copy_from_slice(&bytes);
        Ok(PubKey(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.to_hex())
    }
}

impl Default for PubKey {
    fn default() -> Self {
        PubKey([0u8; 33])
    }
}

/// An output locking script, opaque to the avalanche subsystem.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
