use std::{
    collections::BTreeSet,
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use shared::{
    errors::MinerError,
    interaction::{Handshake, PoolSubmissionResult, ServerMessage, StartMining},
    types::{Challenge, MinerKey, MiningResult, NonceRange},
};
use tokio::sync::mpsc;
use tracing::*;

use crate::{
    partition::partition,
    stats::{SessionStats, Tally},
    thread::{Launcher, UnitTask, WorkerHandle, WorkerUpdate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    Mining,
    Reconnecting,
    Stopped,
}

/// Exponential reconnect delay: `base * 2^attempt`, capped at `max_delay`,
/// for at most `max_retry` consecutive attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_retry: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_retry: u32) -> Self {
        Self { base, max_delay, max_retry, attempts: 0 }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_retry {
            return None;
        }
        let delay = self.base.saturating_mul(2u32.saturating_pow(self.attempts)).min(self.max_delay);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

pub struct SessionConfig {
    pub pubkey: MinerKey,
    /// workers per challenge
    pub cores: usize,
    /// how long past the cutoff to wait for silent workers
    pub grace: Duration,
    pub backoff: Backoff,
}

/// The workers mining one challenge.
struct Generation {
    id: u64,
    challenge: Challenge,
    range: NonceRange,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
    tally: Tally,
    finished: BTreeSet<usize>,
    overdue: bool,
}

impl Generation {
    fn terminate(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn is_complete(&self) -> bool {
        self.finished.len() >= self.workers.len()
    }

    fn silent(&self) -> Vec<usize> {
        self.workers
            .iter()
            .map(|handle| handle.worker)
            .filter(|worker| !self.finished.contains(worker))
            .collect()
    }
}

/// Sole owner of the pool connection state, the worker generation and the
/// live statistics. All methods are synchronous; `stream::run` feeds socket
/// and worker events in.
pub struct Session<L> {
    pubkey: MinerKey,
    cores: usize,
    grace: Duration,
    backoff: Backoff,
    launcher: L,
    state: SessionState,
    active: bool,
    generation: Option<Generation>,
    next_generation: u64,
    updates: mpsc::UnboundedSender<WorkerUpdate>,
    started_at: Option<Instant>,
    retired_hashes: u64,
    retired_best: u32,
    stats: SessionStats,
    last_submission: Option<PoolSubmissionResult>,
}

impl<L: Launcher> Session<L> {
    pub fn new(config: SessionConfig, launcher: L) -> (Self, mpsc::UnboundedReceiver<WorkerUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let session = Self {
            pubkey: config.pubkey,
            cores: config.cores.max(1),
            grace: config.grace,
            backoff: config.backoff,
            launcher,
            state: SessionState::Idle,
            active: false,
            generation: None,
            next_generation: 0,
            updates,
            started_at: None,
            retired_hashes: 0,
            retired_best: 0,
            stats: SessionStats::default(),
            last_submission: None,
        };
        (session, updates_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pubkey(&self) -> &MinerKey {
        &self.pubkey
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Workers of some challenge are running, even while reconnecting.
    pub fn is_hashing(&self) -> bool {
        self.generation.is_some()
    }

    /// Best result for the current challenge.
    pub fn current_best(&self) -> Option<MiningResult> {
        self.generation.as_ref().and_then(|generation| generation.tally.best())
    }

    pub fn last_submission(&self) -> Option<&PoolSubmissionResult> {
        self.last_submission.as_ref()
    }

    pub fn start(&mut self) {
        if !matches!(self.state, SessionState::Idle | SessionState::Stopped) {
            warn!("mining already started, state: {:?}", self.state);
            return;
        }
        info!("start mining, wallet: {}, workers: {}", self.pubkey, self.cores);
        self.state = SessionState::Connecting;
        self.active = true;
        self.started_at = Some(Instant::now());
        self.retired_hashes = 0;
        self.retired_best = 0;
        self.stats = SessionStats::default();
        self.backoff.reset();
    }

    /// Honoured in any state: terminates the workers and disables reconnects.
    pub fn stop(&mut self) {
        self.active = false;
        if let Some(generation) = self.generation.take() {
            generation.terminate();
            self.retire(&generation);
        }
        if self.state != SessionState::Stopped {
            info!("mining stopped. {}", self.stats);
        }
        self.state = SessionState::Stopped;
    }

    /// The socket is open: returns the handshake frame to send.
    pub fn on_open(&mut self, timestamp: u64) -> Option<Bytes> {
        if !matches!(self.state, SessionState::Connecting | SessionState::Reconnecting) {
            warn!("socket opened in state {:?}, no handshake sent", self.state);
            return None;
        }
        self.state = SessionState::Handshaking;
        debug!("handshake, timestamp: {timestamp}");
        Some(Handshake { pubkey: self.pubkey, timestamp }.encode())
    }

    pub fn on_frame(&mut self, frame: &[u8]) {
        match ServerMessage::try_from(frame) {
            Ok(ServerMessage::StartMining(work)) => self.replace_generation(work),
            Ok(ServerMessage::PoolSubmissionResult(result)) => {
                info!(
                    "pool submission, difficulty: {}, nonce: {}, active miners: {}, my difficulty: {}, earned: {:.11} ({:.3}%)",
                    result.difficulty,
                    result.best_nonce,
                    result.active_miners,
                    result.reward_details.miner_supplied_difficulty,
                    result.reward_details.miner_earned_rewards,
                    result.reward_details.miner_percentage
                );
                for boost in &result.boost_reward_details {
                    info!(
                        "boost {}, earned: {:.11} ({:.3}%)",
                        bs58::encode(boost.mint).into_string(),
                        boost.miner_earned_rewards,
                        boost.miner_percentage
                    );
                }
                self.last_submission = Some(result);
            }
            Err(err) => warn!("drop frame ({} bytes): {err}", frame.len()),
        }
    }

    fn replace_generation(&mut self, work: StartMining) {
        if !matches!(self.state, SessionState::Handshaking | SessionState::Mining) {
            warn!("challenge arrived in state {:?}, ignored", self.state);
            return;
        }

        let range = match work.range() {
            Ok(range) => range,
            Err(err) => {
                warn!("drop challenge: {err}");
                return;
            }
        };

        // the old generation must be told to stop before any new worker exists
        if let Some(old) = self.generation.take() {
            old.terminate();
            self.retire(&old);
            if !old.is_complete() {
                debug!("generation {} replaced, unfinished workers: {:?}", old.id, old.silent());
            }
        }

        self.next_generation += 1;
        let id = self.next_generation;
        let cancel = Arc::new(AtomicBool::new(false));
        let cutoff = Duration::from_secs(work.cutoff);
        let stop_time = Instant::now() + cutoff;

        info!(
            "challenge: `{}` nonce range: {range} cutoff: {}s",
            bs58::encode(work.challenge).into_string(),
            work.cutoff
        );

        let workers = partition(range, self.cores)
            .into_iter()
            .enumerate()
            .map(|(worker, range)| {
                let task = UnitTask {
                    generation: id,
                    worker,
                    challenge: work.challenge,
                    range,
                    stop_time,
                    cancel: cancel.clone(),
                };
                self.launcher.launch(task, self.updates.clone())
            })
            .collect();

        self.generation = Some(Generation {
            id,
            challenge: work.challenge,
            range,
            deadline: stop_time + self.grace,
            cancel,
            workers,
            tally: Tally::default(),
            finished: BTreeSet::new(),
            overdue: false,
        });
        self.state = SessionState::Mining;
        // the pool is serving work again, only now is the link healthy
        self.backoff.reset();
        self.refresh(Instant::now());
    }

    fn retire(&mut self, generation: &Generation) {
        self.retired_hashes += generation.tally.total_hashes();
        if let Some(best) = generation.tally.best() {
            self.retired_best = self.retired_best.max(best.best_difficulty);
        }
    }

    pub fn on_worker_update(&mut self, update: WorkerUpdate) {
        let Some(generation) = self.generation.as_mut().filter(|g| g.id == update.generation) else {
            trace!("discard update from generation {}", update.generation);
            return;
        };

        generation.tally = mem::take(&mut generation.tally).reduce(update.worker, update.result);
        if update.done {
            generation.finished.insert(update.worker);
            if generation.is_complete() {
                let best = generation.tally.best().unwrap_or_default();
                info!(
                    "challenge `{}` {} done, best difficulty: {}, nonce: {}, hashes: {}",
                    bs58::encode(generation.challenge).into_string(),
                    generation.range,
                    best.best_difficulty,
                    best.best_nonce,
                    best.total_hashes
                );
            }
        }
        self.refresh(Instant::now());
    }

    /// The socket closed or could not be opened. Returns the delay before the
    /// next attempt, `None` when the session is no longer mining, or an error
    /// once the retry budget is spent.
    pub fn on_disconnect(&mut self) -> Result<Option<Duration>, MinerError> {
        if !self.active {
            debug!("socket closed while not mining, no reconnect");
            return Ok(None);
        }
        match self.backoff.next_delay() {
            Some(delay) => {
                self.state = SessionState::Reconnecting;
                warn!(
                    "server disconnected, retry in {:?} ({}/{})",
                    delay,
                    self.backoff.attempts(),
                    self.backoff.max_retry
                );
                Ok(Some(delay))
            }
            None => {
                let attempts = self.backoff.attempts();
                error!("unable to reach the pool after {attempts} attempts");
                self.stop();
                Err(MinerError::ReconnectExhausted(attempts))
            }
        }
    }

    /// Periodic housekeeping; returns fresh stats.
    pub fn tick(&mut self, now: Instant) -> SessionStats {
        self.refresh(now);
        if let Some(generation) = self.generation.as_mut() {
            if !generation.overdue && !generation.is_complete() && now >= generation.deadline {
                generation.overdue = true;
                let alive = generation.workers.iter().filter(|handle| !handle.is_finished()).count();
                error!(
                    "wait mining result timeout. generation: {}, silent workers: {:?}, threads alive: {alive}",
                    generation.id,
                    generation.silent()
                );
            }
        }
        self.stats
    }

    fn refresh(&mut self, now: Instant) {
        let empty = Tally::default();
        let tally = self.generation.as_ref().map_or(&empty, |generation| &generation.tally);
        let elapsed = self.started_at.map(|at| now.saturating_duration_since(at)).unwrap_or_default();
        self.stats = SessionStats::derive(self.retired_hashes, self.retired_best, tally, elapsed);
    }
}
