//! Seedable random selection.
//!
//! Station picking, favorite picking and animation variant picking all go
//! through a `Picker` so tests can pin the outcome with a fixed seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

#[derive(Debug)]
pub struct Picker {
    rng: StdRng,
}

impl Picker {
    /// A fixed seed gives a reproducible sequence; `None` seeds from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Derive an independent picker, for handing to another task.
    pub fn fork(&mut self) -> Picker {
        Picker {
            rng: StdRng::seed_from_u64(self.rng.gen()),
        }
    }
}
