//! Seeded parameter creation backed by a [`VarMap`].
//!
//! Modules never own mutable weights. They receive plain [`Tensor`] handles
//! whose storage lives in a [`Var`] registered under a dotted name
//! (`"encoder.0.mhesa.alpha"`). An optimiser outside this workspace walks
//! [`ParamStore::varmap`] and updates the variables in place; checkpoints use
//! `VarMap::save` / `VarMap::load` on the same map.
//!
//! Sampling happens on the host with a seeded [`StdRng`] so two stores built
//! from the same seed and the same construction order hold identical values
//! on every device.

use candle_core::{DType, Device, Error, Result, Shape, Tensor, Var};
use candle_nn::VarMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Registry plus random source for every learnable tensor of a model.
pub struct ParamStore {
    varmap: VarMap,
    rng: StdRng,
    dtype: DType,
    device: Device,
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("len", &self.len())
            .finish()
    }
}

impl ParamStore {
    /// Creates an empty store; every parameter is stored as `dtype` on `device`.
    pub fn new(seed: u64, dtype: DType, device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            rng: StdRng::seed_from_u64(seed),
            dtype,
            device: device.clone(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The variables registered so far, keyed by name.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Mutable access for `VarMap::load`, which overwrites variables in place.
    pub fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.varmap
            .data()
            .lock()
            .map(|data| data.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a tensor sampled from `U(-bound, bound)`.
    pub fn uniform<S: Into<Shape>>(&mut self, name: &str, shape: S, bound: f64) -> Result<Tensor> {
        if !(bound.is_finite() && bound > 0.0) {
            return Err(Error::Msg(format!(
                "{name}: uniform bound must be positive and finite, got {bound}"
            )));
        }
        let shape = shape.into();
        let bound = bound as f32;
        let data = (0..shape.elem_count())
            .map(|_| self.rng.gen_range(-bound..bound))
            .collect();
        self.register(name, data, shape)
    }

    /// Registers a tensor sampled from `N(mean, std^2)`.
    pub fn normal<S: Into<Shape>>(
        &mut self,
        name: &str,
        shape: S,
        mean: f64,
        std: f64,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let data = (0..shape.elem_count())
            .map(|_| {
                let sample: f64 = self.rng.sample(StandardNormal);
                (mean + std * sample) as f32
            })
            .collect();
        self.register(name, data, shape)
    }

    /// Registers a tensor filled with `value`.
    pub fn constant<S: Into<Shape>>(&mut self, name: &str, shape: S, value: f32) -> Result<Tensor> {
        let shape = shape.into();
        let data = vec![value; shape.elem_count()];
        self.register(name, data, shape)
    }

    fn register(&mut self, name: &str, data: Vec<f32>, shape: Shape) -> Result<Tensor> {
        let tensor = Tensor::from_vec(data, shape, &self.device)?.to_dtype(self.dtype)?;
        let var = Var::from_tensor(&tensor)?;
        let mut vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::Msg("parameter registry mutex poisoned".into()))?;
        if vars.contains_key(name) {
            return Err(Error::Msg(format!("parameter {name} registered twice")));
        }
        log::debug!("param {name} shape={:?} dtype={:?}", tensor.dims(), self.dtype);
        vars.insert(name.to_string(), var.clone());
        Ok(var.as_tensor().clone())
    }
}
