use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    time::Duration,
};

use shared::types::MiningResult;

/// Latest cumulative result of every worker of one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    workers: BTreeMap<usize, MiningResult>,
}

impl Tally {
    /// Fold one worker report in. Reports are cumulative, so a worker's entry
    /// only moves forward: hashes never shrink and the best never drops.
    pub fn reduce(mut self, worker: usize, result: MiningResult) -> Self {
        let entry = self.workers.entry(worker).or_default();
        let newer = result.total_hashes >= entry.total_hashes;
        if result.best_difficulty > entry.best_difficulty
            || (result.best_difficulty == entry.best_difficulty && newer)
        {
            entry.best_difficulty = result.best_difficulty;
            entry.best_nonce = result.best_nonce;
        }
        if newer {
            entry.total_hashes = result.total_hashes;
        }
        self
    }

    pub fn total_hashes(&self) -> u64 {
        self.workers.values().map(|item| item.total_hashes).sum()
    }

    /// The highest difficulty any worker reported for this challenge.
    pub fn best(&self) -> Option<MiningResult> {
        self.workers
            .values()
            .max_by_key(|item| item.best_difficulty)
            .map(|best| MiningResult { total_hashes: self.total_hashes(), ..*best })
    }
}

/// Session-wide statistics, derived from scratch on every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub hash_rate: u64,
    pub total_hashes: u64,
    pub best_difficulty: u32,
    pub mining_duration_seconds: u64,
}

impl SessionStats {
    /// `retired_*` carry the totals of generations already replaced.
    pub fn derive(retired_hashes: u64, retired_best: u32, tally: &Tally, elapsed: Duration) -> Self {
        let total_hashes = retired_hashes + tally.total_hashes();
        let best_difficulty =
            tally.best().map_or(retired_best, |best| best.best_difficulty.max(retired_best));

        let elapsed_seconds = elapsed.as_millis() as f64 / 1000.0;
        let hash_rate = if elapsed_seconds > 0.0 {
            (total_hashes as f64 / elapsed_seconds).round() as u64
        } else {
            0
        };

        Self { hash_rate, total_hashes, best_difficulty, mining_duration_seconds: elapsed.as_secs() }
    }
}

impl Display for SessionStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mining power: {} H/s, hashes: {}, best difficulty: {}, duration: {}s",
            self.hash_rate, self.total_hashes, self.best_difficulty, self.mining_duration_seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(best_difficulty: u32, best_nonce: u64, total_hashes: u64) -> MiningResult {
        MiningResult { best_difficulty, best_nonce, total_hashes }
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = vec![];
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn four_worker_scenario() {
        let reports =
            [(0, result(3, 4, 25)), (1, result(7, 31, 25)), (2, result(2, 60, 25)), (3, result(5, 80, 25))];
        let tally = reports.into_iter().fold(Tally::default(), |tally, (w, r)| tally.reduce(w, r));

        assert_eq!(tally.total_hashes(), 100);
        assert_eq!(tally.best(), Some(result(7, 31, 100)));

        let stats = SessionStats::derive(0, 0, &tally, Duration::from_secs(4));
        assert_eq!(stats.total_hashes, 100);
        assert_eq!(stats.best_difficulty, 7);
        assert_eq!(stats.hash_rate, 25);
        assert_eq!(stats.mining_duration_seconds, 4);
    }

    #[test]
    fn aggregation_is_order_independent() {
        let reports = vec![
            (0, result(1, 0, 10)),
            (0, result(4, 3, 40)),
            (1, result(9, 77, 12)),
            (2, result(0, 200, 5)),
            (2, result(6, 204, 90)),
        ];
        for order in permutations(&reports) {
            let tally = order.into_iter().fold(Tally::default(), |tally, (w, r)| tally.reduce(w, r));
            assert_eq!(tally.total_hashes(), 40 + 12 + 90);
            assert_eq!(tally.best().map(|best| (best.best_difficulty, best.best_nonce)), Some((9, 77)));
        }
    }

    #[test]
    fn progress_is_not_double_counted() {
        let tally = Tally::default()
            .reduce(0, result(2, 1, 100))
            .reduce(0, result(2, 1, 250))
            .reduce(0, result(3, 180, 400));
        assert_eq!(tally.total_hashes(), 400);
        assert_eq!(tally.best(), Some(result(3, 180, 400)));
    }

    #[test]
    fn zero_elapsed_time_has_zero_rate() {
        let tally = Tally::default().reduce(0, result(1, 1, 10));
        let stats = SessionStats::derive(0, 0, &tally, Duration::ZERO);
        assert_eq!(stats.hash_rate, 0);
        assert_eq!(stats.total_hashes, 10);
    }

    #[test]
    fn retired_generations_carry_over() {
        let tally = Tally::default().reduce(0, result(4, 1, 50));
        let stats = SessionStats::derive(150, 11, &tally, Duration::from_millis(2_500));
        assert_eq!(stats.total_hashes, 200);
        assert_eq!(stats.best_difficulty, 11);
        assert_eq!(stats.hash_rate, 80);

        let empty = SessionStats::derive(150, 11, &Tally::default(), Duration::from_secs(3));
        assert_eq!(empty.best_difficulty, 11);
        assert_eq!(empty.hash_rate, 50);
    }
}
