use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Uniform source in `[0, 1)` used for the bounded price draw.
pub trait UnitSampler: Send + Sync {
    fn sample_unit(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSampler;

impl UnitSampler for ThreadRngSampler {
    fn sample_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[derive(Debug)]
pub struct SeededSampler {
    rng: Mutex<StdRng>,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl UnitSampler for SeededSampler {
    fn sample_unit(&self) -> f64 {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen::<f64>()
    }
}

/// Always returns the same value, clamped into `[0, 1)`.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub f64);

impl UnitSampler for FixedSampler {
    fn sample_unit(&self) -> f64 {
        self.0.clamp(0.0, 1.0 - f64::EPSILON)
    }
}
