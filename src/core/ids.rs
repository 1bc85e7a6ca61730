//! Identifier Generation
//!
//! Random numeric identifiers for sessions and participants.
//! The generator performs no uniqueness check; callers test the result
//! against their own namespace and surface a collision.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;

/// Lowest identifier ever produced (inclusive).
pub const ID_MIN: u32 = 100_000;

/// Upper identifier bound (exclusive).
pub const ID_MAX: u32 = 999_999;

/// Source of candidate identifiers.
pub trait IdGenerator: Send + Sync {
    /// Draw an identifier in `[min, max)`.
    fn generate(&self, min: u32, max: u32) -> u32;
}

/// Uniform pseudo-random identifiers from the thread-local RNG.
///
/// Not cryptographically meaningful: codes are short and guessable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn generate(&self, min: u32, max: u32) -> u32 {
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..max)
    }
}

/// Replays a fixed list of identifiers, then falls back to `min`.
///
/// Useful for tests and demos that need predictable session codes.
#[derive(Debug, Default)]
pub struct FixedIds {
    queue: Mutex<VecDeque<u32>>,
}

impl FixedIds {
    /// Create a generator that yields `ids` in order.
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            queue: Mutex::new(ids.into_iter().collect()),
        }
    }

    /// Number of identifiers left to replay.
    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl IdGenerator for FixedIds {
    fn generate(&self, min: u32, _max: u32) -> u32 {
        match self.queue.lock() {
            Ok(mut queue) => queue.pop_front().unwrap_or(min),
            Err(_) => min,
        }
    }
}
