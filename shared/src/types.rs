use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::errors::{MinerError, MinerResult};

pub type Challenge = [u8; 32];

/// Wallet identity sent in the handshake.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct MinerKey(pub [u8; 32]);

impl MinerKey {
    pub fn from_base58(value: &str) -> MinerResult<Self> {
        let bytes = bs58::decode(value)
            .into_vec()
            .map_err(|err| MinerError::InvalidPubkey(value.to_string(), err.to_string()))?;
        let key: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            MinerError::InvalidPubkey(value.to_string(), format!("{} bytes, need 32", bytes.len()))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for MinerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

/// Inclusive `[start, end]` range of nonces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRange {
    pub start: u64,
    pub end: u64,
}

impl NonceRange {
    pub fn new(start: u64, end: u64) -> MinerResult<Self> {
        if start > end {
            return Err(MinerError::InvalidRange(start, end));
        }
        Ok(Self { start, end })
    }

    /// Number of nonces in the range. A full `[0, u64::MAX]` range holds 2^64.
    pub fn len(&self) -> u128 {
        (self.end as u128) - (self.start as u128) + 1
    }
}

impl Display for NonceRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A worker's best finding for one challenge plus its cumulative attempt count.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningResult {
    pub best_difficulty: u32,
    pub best_nonce: u64,
    pub total_hashes: u64,
}
