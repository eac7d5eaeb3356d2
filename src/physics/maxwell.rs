//! Coupled-field residual assembly for the transient 2-D TE Maxwell system.
//!
//! Three jointly evolved fields over `(x, y, t)`:
//!
//! - `ε ∂Ez/∂t - (∂Hy/∂x - ∂Hx/∂y) = f₁`
//! - `μ ∂Hx/∂t + ∂Ez/∂y           = f₂`
//! - `μ ∂Hy/∂t - ∂Ez/∂x           = f₃`
//!
//! Each equation is tested against the test-function values (first-order
//! system, so only the fields' own derivatives appear under the integral);
//! the temporal derivative contracts against the same value matrix as the
//! spatial curl terms. One sub-kernel per field; the assembly sums the three
//! scalar reductions, and the first sub-kernel failure aborts the whole
//! computation with the error unmodified.

use tch::Tensor;

use crate::error::Result;
use crate::params::BilinearParams;
use crate::physics::{
    contract, mean_over_tests, validate_field, validate_forcing, QuadField, TestFunctions,
};

pub const KERNEL: &str = "maxwell-te";

/// Pre-square residual matrix of the Ez equation, shape `(T, E)`.
pub fn ez_residual_matrix(
    test: &TestFunctions,
    ez: &QuadField,
    hx: &QuadField,
    hy: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
) -> Result<Tensor> {
    validate_field(test, ez, KERNEL)?;
    validate_field(test, hx, KERNEL)?;
    validate_field(test, hy, KERNEL)?;
    validate_forcing(test, forcing, KERNEL)?;
    let eps = bilinear_params.get("eps", KERNEL)?;
    let dez_dt = ez.time_derivative(KERNEL)?;

    let transient = eps * contract(&test.shape_val, dez_dt);
    let curl = contract(&test.shape_val, &hy.grad_x) - contract(&test.shape_val, &hx.grad_y);
    Ok(transient - curl - forcing)
}

/// Pre-square residual matrix of the Hx equation, shape `(T, E)`.
pub fn hx_residual_matrix(
    test: &TestFunctions,
    ez: &QuadField,
    hx: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
) -> Result<Tensor> {
    validate_field(test, ez, KERNEL)?;
    validate_field(test, hx, KERNEL)?;
    validate_forcing(test, forcing, KERNEL)?;
    let mu = bilinear_params.get("mu", KERNEL)?;
    let dhx_dt = hx.time_derivative(KERNEL)?;

    let transient = mu * contract(&test.shape_val, dhx_dt);
    Ok(transient + contract(&test.shape_val, &ez.grad_y) - forcing)
}

/// Pre-square residual matrix of the Hy equation, shape `(T, E)`.
pub fn hy_residual_matrix(
    test: &TestFunctions,
    ez: &QuadField,
    hy: &QuadField,
    forcing: &Tensor,
    bilinear_params: &BilinearParams,
) -> Result<Tensor> {
    validate_field(test, ez, KERNEL)?;
    validate_field(test, hy, KERNEL)?;
    validate_forcing(test, forcing, KERNEL)?;
    let mu = bilinear_params.get("mu", KERNEL)?;
    let dhy_dt = hy.time_derivative(KERNEL)?;

    let transient = mu * contract(&test.shape_val, dhy_dt);
    Ok(transient - contract(&test.shape_val, &ez.grad_x) - forcing)
}

/// Scalar PDE residual of the coupled system: per-field mean-of-squares
/// reduction, then the sum of the three field scalars.
pub fn residual_scalar(
    test: &TestFunctions,
    ez: &QuadField,
    hx: &QuadField,
    hy: &QuadField,
    forcing: [&Tensor; 3],
    bilinear_params: &BilinearParams,
) -> Result<Tensor> {
    let ez_matrix = ez_residual_matrix(test, ez, hx, hy, forcing[0], bilinear_params)?;
    let hx_matrix = hx_residual_matrix(test, ez, hx, forcing[1], bilinear_params)?;
    let hy_matrix = hy_residual_matrix(test, ez, hy, forcing[2], bilinear_params)?;

    let kind = ez_matrix.kind();
    let ez_loss = mean_over_tests(&ez_matrix).mean(kind);
    let hx_loss = mean_over_tests(&hx_matrix).mean(kind);
    let hy_loss = mean_over_tests(&hy_matrix).mean(kind);
    Ok(ez_loss + hx_loss + hy_loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::params::CoefficientMap;
    use tch::{Device, Kind, Tensor};

    fn rand(shape: &[i64]) -> Tensor {
        Tensor::rand(shape, (Kind::Double, Device::Cpu))
    }

    fn zeros(shape: &[i64]) -> Tensor {
        Tensor::zeros(shape, (Kind::Double, Device::Cpu))
    }

    fn transient_field(e: i64, q: i64) -> QuadField {
        QuadField::new(rand(&[e, q]), rand(&[e, q]), rand(&[e, q]))
            .with_time(rand(&[e, q]))
    }

    fn vacuum() -> BilinearParams {
        CoefficientMap::new()
            .with_scalar("eps", 1.0)
            .with_scalar("mu", 1.0)
    }

    #[test]
    fn assembly_sums_per_field_scalars() {
        tch::manual_seed(5);
        let (e, t, q) = (3, 2, 4);
        let test =
            TestFunctions::new(rand(&[e, t, q]), rand(&[e, t, q]), rand(&[e, t, q])).unwrap();
        let (ez, hx, hy) = (
            transient_field(e, q),
            transient_field(e, q),
            transient_field(e, q),
        );
        let forcing = zeros(&[t, e]);
        let params = vacuum();

        let total = residual_scalar(
            &test,
            &ez,
            &hx,
            &hy,
            [&forcing, &forcing, &forcing],
            &params,
        )
        .unwrap();

        let kind = Kind::Double;
        let by_hand = f64::try_from(
            &mean_over_tests(
                &ez_residual_matrix(&test, &ez, &hx, &hy, &forcing, &params).unwrap(),
            )
            .mean(kind),
        )
        .unwrap()
            + f64::try_from(
                &mean_over_tests(&hx_residual_matrix(&test, &ez, &hx, &forcing, &params).unwrap())
                    .mean(kind),
            )
            .unwrap()
            + f64::try_from(
                &mean_over_tests(&hy_residual_matrix(&test, &ez, &hy, &forcing, &params).unwrap())
                    .mean(kind),
            )
            .unwrap();
        assert!((f64::try_from(&total).unwrap() - by_hand).abs() < 1e-12);
    }

    /// Stationary fields whose curl matches the forcing satisfy the system.
    #[test]
    fn residual_vanishes_when_weak_form_is_satisfied() {
        tch::manual_seed(9);
        let (e, t, q) = (2, 3, 4);
        let test =
            TestFunctions::new(rand(&[e, t, q]), rand(&[e, t, q]), rand(&[e, t, q])).unwrap();
        let (ez, hx, hy) = (
            transient_field(e, q),
            transient_field(e, q),
            transient_field(e, q),
        );
        let params = vacuum();
        let zero = zeros(&[t, e]);

        let f1 = ez_residual_matrix(&test, &ez, &hx, &hy, &zero, &params).unwrap();
        let f2 = hx_residual_matrix(&test, &ez, &hx, &zero, &params).unwrap();
        let f3 = hy_residual_matrix(&test, &ez, &hy, &zero, &params).unwrap();

        let total = residual_scalar(&test, &ez, &hx, &hy, [&f1, &f2, &f3], &params).unwrap();
        assert!(f64::try_from(&total).unwrap().abs() < 1e-12);
    }

    #[test]
    fn sub_kernel_error_propagates_unmodified() {
        let (e, t, q) = (1, 1, 2);
        let test =
            TestFunctions::new(zeros(&[e, t, q]), zeros(&[e, t, q]), zeros(&[e, t, q])).unwrap();
        let (ez, hx, hy) = (
            transient_field(e, q),
            transient_field(e, q),
            transient_field(e, q),
        );
        let missing_mu = CoefficientMap::new().with_scalar("eps", 1.0);
        let zero = zeros(&[t, e]);

        let err = residual_scalar(&test, &ez, &hx, &hy, [&zero, &zero, &zero], &missing_mu)
            .unwrap_err();
        match err {
            Error::MissingCoefficient { name, kernel } => {
                assert_eq!(name, "mu");
                assert_eq!(kernel, KERNEL);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_broadcastable_forcing_is_fatal() {
        let (e, t, q) = (2, 2, 3);
        let test =
            TestFunctions::new(rand(&[e, t, q]), rand(&[e, t, q]), rand(&[e, t, q])).unwrap();
        let (ez, hx, hy) = (
            transient_field(e, q),
            transient_field(e, q),
            transient_field(e, q),
        );
        let zero = zeros(&[t, e]);
        let bad = zeros(&[t, e + 1]);

        let err = residual_scalar(&test, &ez, &hx, &hy, [&bad, &zero, &zero], &vacuum())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn spatial_only_fields_are_rejected() {
        let (e, t, q) = (1, 1, 2);
        let test =
            TestFunctions::new(zeros(&[e, t, q]), zeros(&[e, t, q]), zeros(&[e, t, q])).unwrap();
        let spatial = QuadField::new(zeros(&[e, q]), zeros(&[e, q]), zeros(&[e, q]));
        let (hx, hy) = (transient_field(e, q), transient_field(e, q));
        let zero = zeros(&[t, e]);

        let err =
            residual_scalar(&test, &spatial, &hx, &hy, [&zero, &zero, &zero], &vacuum())
                .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(err.to_string().contains("grad_t"));
    }
}
