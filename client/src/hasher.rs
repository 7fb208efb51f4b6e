use drillx::{equix, Hash};
use shared::types::Challenge;

/// The compiled proof-of-work module behind the worker interface.
///
/// One nonce may yield several candidate hashes (or none, when equix finds no
/// solution); each counts as one attempt.
pub trait HashSource: Send + 'static {
    fn hashes(&mut self, challenge: &Challenge, nonce: u64) -> Vec<Hash>;
}

/// drillx with a solver memory reused across nonces.
pub struct Drillx {
    memory: equix::SolverMemory,
}

impl Drillx {
    pub fn new() -> Self {
        Self { memory: equix::SolverMemory::new() }
    }
}

impl Default for Drillx {
    fn default() -> Self {
        Self::new()
    }
}

impl HashSource for Drillx {
    fn hashes(&mut self, challenge: &Challenge, nonce: u64) -> Vec<Hash> {
        drillx::hashes_with_memory(&mut self.memory, challenge, &nonce.to_le_bytes())
    }
}
