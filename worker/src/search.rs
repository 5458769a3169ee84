use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use shared::{
    pow,
    types::{SearchRange, WorkerId},
};
use tracing::{debug, trace};

/// Terminal states of one sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found { nonce: u64, digest: [u8; 32], leading_zeros: u32, elapsed: Duration },
    Cancelled { last_nonce: u64, elapsed: Duration },
    Exhausted { elapsed: Duration },
}

/// One CPU-bound brute-force sweep over a half-open nonce range. Runs on a
/// dedicated OS thread.
///
/// `halt` is a write-once cooperative stop flag. `cursor` tracks the nonce
/// currently under test so a concurrent listener can report progress.
pub struct SearchTask {
    pub worker: WorkerId,
    pub payload: String,
    pub range: SearchRange,
    pub difficulty: u32,
    pub halt: Arc<AtomicBool>,
    pub cursor: Arc<AtomicU64>,
}

impl SearchTask {
    pub fn run(self) -> SearchOutcome {
        debug!("{}: searching {}", self.worker, self.range);

        let started = Instant::now();
        let mut nonce = self.range.start;

        while nonce < self.range.end {
            // a nonce already being hashed is still allowed to win; the
            // sweep only gives up on nonces it has not started yet
            if self.halt.load(Ordering::Relaxed) {
                return SearchOutcome::Cancelled { last_nonce: nonce, elapsed: started.elapsed() };
            }
            self.cursor.store(nonce, Ordering::Relaxed);

            let digest = pow::digest(&self.payload, nonce);
            if pow::meets_difficulty(&digest, self.difficulty) {
                let leading_zeros = pow::leading_zeros(&digest);
                trace!("{}: nonce {nonce} carries {leading_zeros} leading zero bits", self.worker);
                return SearchOutcome::Found {
                    nonce,
                    digest,
                    leading_zeros,
                    elapsed: started.elapsed(),
                };
            }
            nonce += 1;
        }

        SearchOutcome::Exhausted { elapsed: started.elapsed() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(range: SearchRange, difficulty: u32, halt: Arc<AtomicBool>) -> SearchTask {
        SearchTask {
            worker: WorkerId(0),
            payload: "blockdata".to_string(),
            range,
            difficulty,
            halt,
            cursor: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn zero_difficulty_hits_the_first_nonce() {
        let halt = Arc::new(AtomicBool::new(false));
        match task(SearchRange::new(5, 100), 0, halt).run() {
            SearchOutcome::Found { nonce, leading_zeros: _, .. } => assert_eq!(nonce, 5),
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[test]
    fn halt_flag_stops_the_sweep() {
        let halt = Arc::new(AtomicBool::new(true));
        match task(SearchRange::new(0, 1 << 20), 0, halt).run() {
            SearchOutcome::Cancelled { last_nonce, .. } => assert_eq!(last_nonce, 0),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn impossible_difficulty_exhausts_the_range() {
        let halt = Arc::new(AtomicBool::new(false));
        match task(SearchRange::new(0, 64), shared::pow::DIGEST_BITS, halt).run() {
            SearchOutcome::Exhausted { .. } => {}
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn empty_range_exhausts_immediately() {
        let halt = Arc::new(AtomicBool::new(false));
        match task(SearchRange::new(10, 10), 0, halt).run() {
            SearchOutcome::Exhausted { .. } => {}
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
