use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use core_affinity::CoreId;
use shared::types::{Challenge, MiningResult, NonceRange};
use tokio::sync::mpsc;
use tracing::*;

use crate::hasher::HashSource;

/// Cumulative progress is posted at most this often.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// One worker's share of a challenge.
#[derive(Debug, Clone)]
pub struct UnitTask {
    pub generation: u64,
    pub worker: usize,
    pub challenge: Challenge,
    /// `None` when the partition left this worker nothing to search
    pub range: Option<NonceRange>,
    pub stop_time: Instant,
    /// shared by every worker of the generation
    pub cancel: Arc<AtomicBool>,
}

/// Worker -> coordinator. `result` is cumulative for the task, not a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerUpdate {
    pub generation: u64,
    pub worker: usize,
    pub result: MiningResult,
    pub done: bool,
}

/// Search `task.range` until the range is exhausted, the cutoff passes or the
/// generation is cancelled. Every nonce is hashed before those checks, so a
/// single-nonce range is always attempted once.
///
/// Returns the final result, or `None` if the task was cancelled. `report` is
/// called with cumulative progress and once more with `done = true` unless
/// cancelled.
pub fn search<H, F>(hasher: &mut H, task: &UnitTask, mut report: F) -> Option<MiningResult>
where
    H: HashSource,
    F: FnMut(MiningResult, bool), {
    let Some(range) = task.range else {
        trace!("worker: {}, empty range", task.worker);
        report(MiningResult::default(), true);
        return Some(MiningResult::default());
    };

    let mut result = MiningResult { best_nonce: range.start, ..Default::default() };
    let mut last_report = Instant::now();
    let mut nonce = range.start;

    loop {
        for hx in hasher.hashes(&task.challenge, nonce) {
            let diff = hx.difficulty();
            if diff.gt(&result.best_difficulty) {
                result.best_nonce = nonce;
                result.best_difficulty = diff;
            }
            result.total_hashes += 1;
        }

        if task.cancel.load(Ordering::Relaxed) {
            trace!("generation: {}, worker: {} cancelled", task.generation, task.worker);
            return None;
        }

        if nonce.ge(&range.end) || task.stop_time.le(&Instant::now()) {
            break;
        }

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            report(result, false);
        }

        nonce += 1;
    }

    report(result, true);
    Some(result)
}

/// Handle to a launched worker. Termination goes through the generation's
/// cancel flag, the handle only keeps the thread around for inspection.
#[derive(Debug)]
pub struct WorkerHandle {
    pub worker: usize,
    pub thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }
}

/// Starts one worker per task. Implementations must not block the caller.
pub trait Launcher {
    fn launch(&mut self, task: UnitTask, updates: mpsc::UnboundedSender<WorkerUpdate>) -> WorkerHandle;
}

/// Runs every task on a fresh OS thread pinned to a core.
pub struct CoreThread<H> {
    cores: usize,
    hasher: PhantomData<fn() -> H>,
}

impl<H> CoreThread<H> {
    pub fn new(cores: usize) -> Self {
        Self { cores: cores.max(1), hasher: PhantomData }
    }
}

impl<H> Launcher for CoreThread<H>
where
    H: HashSource + Default,
{
    fn launch(&mut self, task: UnitTask, updates: mpsc::UnboundedSender<WorkerUpdate>) -> WorkerHandle {
        let worker = task.worker;
        let cid = worker % self.cores;

        let thread = std::thread::Builder::new()
            .name(format!("hash-{}-{worker}", task.generation))
            .spawn(move || {
                // bound thread to core
                let _ = core_affinity::set_for_current(CoreId { id: cid });

                debug!("generation: {}, core: {cid}, task range: {:?}", task.generation, task.range);

                let mut hasher = H::default();
                let UnitTask { generation, worker, .. } = task;
                let outcome = search(&mut hasher, &task, |result, done| {
                    updates.send(WorkerUpdate { generation, worker, result, done }).ok();
                });

                if let Some(result) = outcome {
                    trace!(
                        "generation: {generation}, core: {cid}, difficulty: {}, hashes: {}",
                        result.best_difficulty,
                        result.total_hashes
                    );
                }
            });

        match thread {
            Ok(thread) => WorkerHandle { worker, thread: Some(thread) },
            Err(err) => {
                error!("fail to spawn hash worker {worker}: {err:#}");
                WorkerHandle { worker, thread: None }
            }
        }
    }
}
