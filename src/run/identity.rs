//! Run identities: seed + mode (+ batch index) mapped to a directory name.

#![allow(missing_docs)]

use std::fmt;

use rand::Rng;
use serde::Serialize;

use crate::core::errors::{HarnessError, Result};

/// Seeds live in `[0, 2^31)`.
pub const SEED_MASK: u32 = 0x7FFF_FFFF;

/// Mask an externally supplied seed into the 31-bit seed domain.
///
/// Out-of-range values are masked, not rejected; negative values keep their
/// low 31 two's-complement bits.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn mask_seed(seed: i64) -> u32 {
    (seed & SEED_MASK as i64) as u32
}

/// Draw a fresh seed uniformly from the seed domain.
pub fn random_seed<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.random_range(0..=SEED_MASK)
}

/// Whether the design's stimulus randomization is on for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Random,
    /// Randomization forced off: the fixed-data half of a leakage pair.
    FixedData,
}

impl RunMode {
    pub const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Random => None,
            Self::FixedData => Some("no_random"),
        }
    }
}

/// Identity of one run within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunIdentity {
    pub seed: u32,
    pub mode: RunMode,
    /// Position in a multi-run batch.
    pub index: Option<usize>,
}

impl RunIdentity {
    pub const fn new(seed: u32, mode: RunMode) -> Self {
        Self {
            seed: seed & SEED_MASK,
            mode,
            index: None,
        }
    }

    pub const fn indexed(index: usize, seed: u32) -> Self {
        Self {
            seed: seed & SEED_MASK,
            mode: RunMode::Random,
            index: Some(index),
        }
    }

    /// `[<index>_]<seed as 8 hex digits>[_<mode suffix>]`.
    pub fn dir_name(&self) -> String {
        let mut name = match self.index {
            Some(index) => format!("{index}_{:08x}", self.seed),
            None => format!("{:08x}", self.seed),
        };
        if let Some(suffix) = self.mode.suffix() {
            name.push('_');
            name.push_str(suffix);
        }
        name
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// Sample indexed identities until `is_taken` rejects none, at most `max_attempts` times.
pub fn next_candidate<R, F>(
    rng: &mut R,
    index: usize,
    mut is_taken: F,
    max_attempts: u32,
) -> Result<RunIdentity>
where
    R: Rng + ?Sized,
    F: FnMut(&RunIdentity) -> bool,
{
    for _ in 0..max_attempts {
        let candidate = RunIdentity::indexed(index, random_seed(rng));
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(HarnessError::IdentityExhausted {
        attempts: max_attempts,
    })
}
