//! Tie-break among equally loaded agents.

use std::sync::{Mutex, PoisonError};

use {
    rand::{Rng, SeedableRng, rngs::StdRng},
    switchboard_store::ScoredMember,
};

/// Chooses one candidate out of several holding the same minimum load.
pub trait TieBreak: Send + Sync {
    /// Index into `candidates`, or `None` when it is empty.
    fn pick(&self, candidates: &[ScoredMember]) -> Option<usize>;
}

/// Uniform random choice.
pub struct RandomTieBreak {
    rng: Mutex<StdRng>,
}

impl RandomTieBreak {
    /// Deterministic sequence, for tests and reproducible replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_os_rng, Self::seeded)
    }
}

impl TieBreak for RandomTieBreak {
    fn pick(&self, candidates: &[ScoredMember]) -> Option<usize> {
        match candidates.len() {
            0 => None,
            1 => Some(0),
            n => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                Some(rng.random_range(0..n))
            },
        }
    }
}

/// Always the first candidate (lowest agent id).
pub struct FirstCandidate;

impl TieBreak for FirstCandidate {
    fn pick(&self, candidates: &[ScoredMember]) -> Option<usize> {
        (!candidates.is_empty()).then_some(0)
    }
}
