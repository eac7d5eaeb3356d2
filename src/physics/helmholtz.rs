//! Weak-form residual of the 2-D Helmholtz equation `-Δu - k²u = f`.
//!
//! The diffusion contraction enters with a negative sign and the wave term
//! adds `k²` times the mass contraction; both coefficients come from the
//! bilinear-parameter map (`eps` is typically 1).

use tch::Tensor;

use crate::error::Result;
use crate::params::BilinearParams;
use crate::physics::{
    contract, mean_over_tests, validate_field, validate_forcing, QuadField, TestFunctions,
};

pub const KERNEL: &str = "helmholtz";

/// Pre-square residual matrix, shape `(n_test_functions, n_elements)`.
///
/// Composition: `-eps * ∫∇u·∇v + k² ∫uv - f`.
pub fn residual_matrix(
    test: &TestFunctions,
    field: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
) -> Result<Tensor> {
    validate_field(test, field, KERNEL)?;
    validate_forcing(test, forcing, KERNEL)?;
    let eps = bilinear_params.get("eps", KERNEL)?;
    let k = bilinear_params.get("k", KERNEL)?;

    let diffusion_x = contract(&test.grad_x, &field.grad_x);
    let diffusion_y = contract(&test.grad_y, &field.grad_y);
    let diffusion = eps * (diffusion_x + diffusion_y);

    let wave = k.square() * contract(&test.shape_val, &field.value);

    Ok(wave - diffusion - forcing)
}

/// Per-element residual: mean of squares over the test-function axis,
/// shape `(n_cells,)`.
pub fn residual(
    test: &TestFunctions,
    field: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
) -> Result<Tensor> {
    Ok(mean_over_tests(&residual_matrix(
        test,
        field,
        forcing,
        bilinear_params,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::params::CoefficientMap;
    use tch::{Device, Kind, Tensor};

    fn dbl(values: &[f64], shape: &[i64]) -> Tensor {
        Tensor::from_slice(values)
            .reshape(shape)
            .to_kind(Kind::Double)
            .to_device(Device::Cpu)
    }

    fn zeros(shape: &[i64]) -> Tensor {
        Tensor::zeros(shape, (Kind::Double, Device::Cpu))
    }

    fn wave_params() -> BilinearParams {
        CoefficientMap::new()
            .with_scalar("eps", 1.0)
            .with_scalar("k", 2.0)
    }

    /// eps = 1, k = 2, a single unit value at a single quadrature point with
    /// zero gradients: the wave term is 4, diffusion 0, residual 4, squared
    /// mean 16.
    #[test]
    fn wave_term_scenario() {
        let test = TestFunctions::new(
            dbl(&[1.0], &[1, 1, 1]),
            zeros(&[1, 1, 1]),
            zeros(&[1, 1, 1]),
        )
        .unwrap();
        let field = QuadField::new(dbl(&[1.0], &[1, 1]), zeros(&[1, 1]), zeros(&[1, 1]));
        let forcing = zeros(&[1, 1]);

        let cells = residual(&test, &field, &forcing, &wave_params()).unwrap();
        assert_eq!(cells.size(), vec![1]);
        assert!((cells.double_value(&[0]) - 16.0).abs() < 1e-12);
    }

    /// Shifting the forcing by a constant delta shifts the pre-square
    /// residual matrix by exactly -delta.
    #[test]
    fn residual_is_linear_in_forcing() {
        tch::manual_seed(3);
        let (e, t, q) = (3, 2, 4);
        let test = TestFunctions::new(
            Tensor::rand(&[e, t, q], (Kind::Double, Device::Cpu)),
            Tensor::rand(&[e, t, q], (Kind::Double, Device::Cpu)),
            Tensor::rand(&[e, t, q], (Kind::Double, Device::Cpu)),
        )
        .unwrap();
        let field = QuadField::new(
            Tensor::rand(&[e, q], (Kind::Double, Device::Cpu)),
            Tensor::rand(&[e, q], (Kind::Double, Device::Cpu)),
            Tensor::rand(&[e, q], (Kind::Double, Device::Cpu)),
        );
        let forcing = Tensor::rand(&[t, e], (Kind::Double, Device::Cpu));
        let delta = 0.37;

        let m1 = residual_matrix(&test, &field, &forcing, &wave_params()).unwrap();
        let m2 = residual_matrix(&test, &field, &(&forcing + delta), &wave_params()).unwrap();
        assert!(f64::try_from(&(m2 - m1 + delta).abs().max()).unwrap() < 1e-12);
    }

    #[test]
    fn missing_wave_number_is_reported() {
        let test = TestFunctions::new(zeros(&[1, 1, 1]), zeros(&[1, 1, 1]), zeros(&[1, 1, 1]))
            .unwrap();
        let field = QuadField::new(zeros(&[1, 1]), zeros(&[1, 1]), zeros(&[1, 1]));
        let bilinear = CoefficientMap::new().with_scalar("eps", 1.0);
        let err = residual(&test, &field, &zeros(&[1, 1]), &bilinear).unwrap_err();
        match err {
            Error::MissingCoefficient { name, .. } => assert_eq!(name, "k"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
