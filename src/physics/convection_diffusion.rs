//! Weak-form residual of the 2-D convection-diffusion inverse problem with a
//! spatially varying unknown diffusion coefficient.
//!
//! The coefficient `eps` is a per-quadrature-point tensor (typically the
//! output of a coefficient sub-network) and multiplies the predicted gradient
//! *before* the test-function contraction. The order matters: a coefficient
//! that varies inside the element must enter the integrand before integration.
//! This is intentionally asymmetric with the constant-coefficient Poisson
//! kernel, where scaling after the contraction is equivalent.

use tch::Tensor;

use crate::error::Result;
use crate::params::{BilinearParams, InverseParams};
use crate::physics::{
    contract, mean_over_tests, validate_field, validate_forcing, QuadField, TestFunctions,
};

pub const KERNEL: &str = "cd2d-inverse";

/// Pre-square residual matrix, shape `(n_test_functions, n_elements)`.
///
/// Composition: `∫ε∇u·∇v + b_x∫(du/dx)v + b_y∫(du/dy)v + c∫uv - f`.
pub fn residual_matrix(
    test: &TestFunctions,
    field: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
    inverse_params: &InverseParams,
) -> Result<Tensor> {
    validate_field(test, field, KERNEL)?;
    validate_forcing(test, forcing, KERNEL)?;
    let eps = inverse_params.get("eps", KERNEL)?;
    let b_x = bilinear_params.get("b_x", KERNEL)?;
    let b_y = bilinear_params.get("b_y", KERNEL)?;
    let c = bilinear_params.get("c", KERNEL)?;

    // Coefficient enters before integration, per quadrature point.
    let diffusion_x = contract(&test.grad_x, &(&field.grad_x * eps));
    let diffusion_y = contract(&test.grad_y, &(&field.grad_y * eps));
    let diffusion = diffusion_x + diffusion_y;

    let convection_x = contract(&test.shape_val, &field.grad_x);
    let convection_y = contract(&test.shape_val, &field.grad_y);
    let convection = b_x * convection_x + b_y * convection_y;

    let reaction = c * contract(&test.shape_val, &field.value);

    Ok(diffusion + convection + reaction - forcing)
}

/// Per-element residual: mean of squares over the test-function axis,
/// shape `(n_cells,)`.
pub fn residual(
    test: &TestFunctions,
    field: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
    inverse_params: &InverseParams,
) -> Result<Tensor> {
    Ok(mean_over_tests(&residual_matrix(
        test,
        field,
        forcing,
        bilinear_params,
        inverse_params,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::params::CoefficientMap;
    use crate::physics::poisson_inverse;
    use tch::{Device, Kind, Tensor};

    fn rand(shape: &[i64]) -> Tensor {
        Tensor::rand(shape, (Kind::Double, Device::Cpu))
    }

    fn zeros(shape: &[i64]) -> Tensor {
        Tensor::zeros(shape, (Kind::Double, Device::Cpu))
    }

    fn random_setup(e: i64, t: i64, q: i64) -> (TestFunctions, QuadField) {
        let test =
            TestFunctions::new(rand(&[e, t, q]), rand(&[e, t, q]), rand(&[e, t, q])).unwrap();
        let field = QuadField::new(rand(&[e, q]), rand(&[e, q]), rand(&[e, q]));
        (test, field)
    }

    fn no_transport() -> BilinearParams {
        CoefficientMap::new()
            .with_scalar("b_x", 0.0)
            .with_scalar("b_y", 0.0)
            .with_scalar("c", 0.0)
    }

    /// With a constant coefficient the pre-contraction placement matches the
    /// Poisson kernel's post-contraction scaling exactly.
    #[test]
    fn constant_coefficient_matches_post_contraction_scaling() {
        let (test, field) = random_setup(3, 2, 4);
        let forcing = zeros(&[2, 3]);
        let inverse = CoefficientMap::new().with_scalar("eps", 1.5);

        let pre = residual_matrix(&test, &field, &forcing, &no_transport(), &inverse).unwrap();
        let post = poisson_inverse::residual_matrix(&test, &field, &forcing, &inverse).unwrap();
        assert!(f64::try_from(&(pre - post).abs().max()).unwrap() < 1e-12);
    }

    /// With a varying coefficient the placements genuinely differ: replacing
    /// the field by its per-element mean constant changes the residual.
    #[test]
    fn varying_coefficient_is_not_a_constant_scaling() {
        tch::manual_seed(7);
        let (test, field) = random_setup(2, 3, 5);
        let forcing = zeros(&[3, 2]);

        // Coefficient varying across quadrature points, mean 1.0.
        let coeff = rand(&[2, 5]) + 0.5;
        let mean = f64::try_from(&coeff.mean(Kind::Double)).unwrap();
        let varying = CoefficientMap::new().with("eps", coeff);
        let constant = CoefficientMap::new().with_scalar("eps", mean);

        let m_varying =
            residual_matrix(&test, &field, &forcing, &no_transport(), &varying).unwrap();
        let m_constant =
            residual_matrix(&test, &field, &forcing, &no_transport(), &constant).unwrap();
        assert!(f64::try_from(&(m_varying - m_constant).abs().max()).unwrap() > 1e-6);
    }

    #[test]
    fn residual_vanishes_when_weak_form_is_satisfied() {
        tch::manual_seed(11);
        let (test, field) = random_setup(4, 3, 4);
        let bilinear = CoefficientMap::new()
            .with_scalar("b_x", 1.0)
            .with_scalar("b_y", 0.5)
            .with_scalar("c", 2.0);
        let inverse = CoefficientMap::new().with("eps", rand(&[4, 4]) + 0.1);

        let exact =
            residual_matrix(&test, &field, &zeros(&[3, 4]), &bilinear, &inverse).unwrap();
        let cells = residual(&test, &field, &exact, &bilinear, &inverse).unwrap();
        assert!(f64::try_from(&cells.abs().max()).unwrap() < 1e-12);
    }

    #[test]
    fn missing_convection_coefficient_is_reported() {
        let (test, field) = random_setup(1, 1, 2);
        let bilinear = CoefficientMap::new().with_scalar("b_x", 1.0);
        let inverse = CoefficientMap::new().with_scalar("eps", 1.0);
        let err =
            residual(&test, &field, &zeros(&[1, 1]), &bilinear, &inverse).unwrap_err();
        match err {
            Error::MissingCoefficient { name, kernel } => {
                assert_eq!(name, "b_y");
                assert_eq!(kernel, KERNEL);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
