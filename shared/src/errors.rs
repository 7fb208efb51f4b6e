use thiserror::Error;

/// Reasons an inbound frame could not be turned into a [`crate::interaction::ServerMessage`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("start mining frame too short: {0} bytes, need at least {1}")]
    TooShort(usize, usize),
    #[error("unknown frame tag: {0:#04x}")]
    UnknownTag(u8),
    #[error("submission result payload is not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("submission result payload is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("invalid wallet pubkey `{0}`: {1}")]
    InvalidPubkey(String, String),
    #[error("invalid nonce range: start {0} is after end {1}")]
    InvalidRange(u64, u64),
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

pub type MinerResult<T> = Result<T, MinerError>;
