//! Inverted dropout with a deterministic host-side mask.
//!
//! Masks are drawn from a seeded [`Lcg64`] so a model built with the same seed
//! drops the same units on every run. During evaluation (or when the
//! probability is zero) [`Dropout::forward`] returns its input unchanged.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use candle_core::{Error, Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Dropout policy: disabled, or enabled with a probability and RNG state.
#[derive(Debug)]
pub enum DropoutMode {
    Disabled,
    Enabled { probability: f32, rng: Mutex<Lcg64> },
}

impl Clone for DropoutMode {
    fn clone(&self) -> Self {
        match self {
            DropoutMode::Disabled => DropoutMode::Disabled,
            DropoutMode::Enabled { probability, rng } => {
                let state = match rng.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                DropoutMode::Enabled {
                    probability: *probability,
                    rng: Mutex::new(state),
                }
            }
        }
    }
}

impl DropoutMode {
    /// Builds a mode from a probability in `[0, 1)`; zero disables dropout.
    pub fn from_probability(probability: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::Msg(format!(
                "dropout probability must lie in [0, 1), got {probability}"
            )));
        }
        if probability == 0.0 {
            return Ok(DropoutMode::Disabled);
        }
        Ok(DropoutMode::Enabled {
            probability,
            rng: Mutex::new(Lcg64::new(seed)),
        })
    }

    pub fn probability(&self) -> f32 {
        match self {
            DropoutMode::Disabled => 0.0,
            DropoutMode::Enabled { probability, .. } => *probability,
        }
    }

    /// Draws a keep mask of `len` entries, already scaled by `1 / (1 - p)`.
    ///
    /// Returns `None` when the mode is disabled.
    pub fn sample_mask(&self, len: usize) -> Result<Option<Vec<f32>>> {
        match self {
            DropoutMode::Disabled => Ok(None),
            DropoutMode::Enabled { probability, rng } => {
                let keep_prob = 1.0 - probability;
                let scale = 1.0 / keep_prob;
                let mut rng = rng
                    .lock()
                    .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
                let mask = (0..len)
                    .map(|_| if rng.next_f32() < keep_prob { scale } else { 0.0 })
                    .collect();
                Ok(Some(mask))
            }
        }
    }
}

/// Dropout layer with an interior training flag.
pub struct Dropout {
    mode: DropoutMode,
    training: AtomicBool,
}

impl Clone for Dropout {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode.clone(),
            training: AtomicBool::new(self.is_training()),
        }
    }
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.mode.probability())
            .field("training", &self.is_training())
            .finish()
    }
}

impl Dropout {
    /// Creates a dropout layer in training mode.
    pub fn new(probability: f32, seed: u64) -> Result<Self> {
        Ok(Self {
            mode: DropoutMode::from_probability(probability, seed)?,
            training: AtomicBool::new(true),
        })
    }

    pub fn probability(&self) -> f32 {
        self.mode.probability()
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    /// Whether the next forward call would zero any elements.
    pub fn is_active(&self) -> bool {
        self.is_training() && matches!(self.mode, DropoutMode::Enabled { .. })
    }

    /// Scaled keep mask for callers that apply dropout on host buffers.
    ///
    /// `None` in evaluation mode or when the probability is zero.
    pub fn sample_mask(&self, len: usize) -> Result<Option<Vec<f32>>> {
        if !self.is_training() {
            return Ok(None);
        }
        self.mode.sample_mask(len)
    }

    /// Applies dropout to a tensor of any rank.
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let Some(mask) = self.sample_mask(input.elem_count())? else {
            return Ok(input.clone());
        };
        let compute = policy.cast_for_matmul(input)?;
        let mask = Tensor::from_vec(mask, input.dims(), input.device())?.to_dtype(compute.dtype())?;
        policy.cast_to_storage(&compute.mul(&mask)?)
    }
}

/// 64-bit linear congruential generator for deterministic dropout masks.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // Knuth's MMIX constants.
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform sample in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        let bits = self.next_u64() >> 11;
        (bits as f64 * SCALE) as f32
    }
}
