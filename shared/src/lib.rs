pub mod errors;
pub mod interaction;
pub mod log;
pub mod types;

/// Local unix time in seconds.
pub fn timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
