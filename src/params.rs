//! Named coefficient maps for the bilinear forms.
//!
//! A [`CoefficientMap`] carries the physical coefficients of a PDE (convection
//! velocity, reaction rate, diffusion, wave number) as tensors so that scalar
//! coefficients broadcast over the residual matrix and trainable inverse
//! parameters keep their autodiff graph. Kernels look coefficients up by name
//! and fail with [`Error::MissingCoefficient`] when a required key is absent.

use std::collections::HashMap;

use tch::Tensor;

use crate::error::{Error, Result};

/// Mapping from coefficient name to a scalar or broadcastable tensor value.
#[derive(Debug, Default)]
pub struct CoefficientMap {
    values: HashMap<String, Tensor>,
}

/// Physical coefficients entering a PDE's bilinear form.
pub type BilinearParams = CoefficientMap;

/// Unknown physical coefficients recovered jointly with the solution field.
/// Values are trainable tensors registered in the model's variable store.
pub type InverseParams = CoefficientMap;

impl CoefficientMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a tensor coefficient.
    pub fn with(mut self, name: &str, value: Tensor) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Builder-style insertion of a plain scalar. Stored as a zero-dim tensor
    /// so it broadcasts and type-promotes like any other coefficient.
    pub fn with_scalar(self, name: &str, value: f64) -> Self {
        self.with(name, Tensor::from(value))
    }

    pub fn set(&mut self, name: &str, value: Tensor) {
        self.values.insert(name.to_string(), value);
    }

    /// Looks up a required coefficient for `kernel`.
    pub fn get(&self, name: &str, kernel: &'static str) -> Result<&Tensor> {
        self.values.get(name).ok_or_else(|| Error::MissingCoefficient {
            name: name.to_string(),
            kernel,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn lookup_returns_stored_coefficient() {
        let params = CoefficientMap::new().with_scalar("eps", 2.0);
        let eps = params.get("eps", "poisson-inverse").unwrap();
        assert!((f64::try_from(eps).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn missing_key_reports_kernel_and_name() {
        let params = CoefficientMap::new().with_scalar("b_x", 1.0);
        let err = params.get("c", "cd2d-inverse").unwrap_err();
        match err {
            Error::MissingCoefficient { name, kernel } => {
                assert_eq!(name, "c");
                assert_eq!(kernel, "cd2d-inverse");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
