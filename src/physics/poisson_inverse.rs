//! Weak-form residual of the Poisson inverse problem `-∇·(ε∇u) = f` with an
//! unknown constant diffusion coefficient ε.
//!
//! The coefficient is recovered jointly with the solution: `eps` lives in the
//! inverse-parameter map as a trainable tensor and scales the diffusion
//! contraction *after* integration, which is exact for a constant coefficient.

use tch::Tensor;

use crate::error::Result;
use crate::params::InverseParams;
use crate::physics::{
    contract, mean_over_tests, validate_field, validate_forcing, QuadField, TestFunctions,
};

pub const KERNEL: &str = "poisson-inverse";

/// Pre-square residual matrix, shape `(n_test_functions, n_elements)`.
///
/// Composition: `eps * (∫du/dx dv/dx + ∫du/dy dv/dy) - f`.
pub fn residual_matrix(
    test: &TestFunctions,
    field: &QuadField,
    forcing: &Tensor,
    inverse_params: &InverseParams,
) -> Result<Tensor> {
    validate_field(test, field, KERNEL)?;
    validate_forcing(test, forcing, KERNEL)?;
    let eps = inverse_params.get("eps", KERNEL)?;

    let diffusion_x = contract(&test.grad_x, &field.grad_x);
    let diffusion_y = contract(&test.grad_y, &field.grad_y);
    let diffusion = eps * (diffusion_x + diffusion_y);

    Ok(diffusion - forcing)
}

/// Per-element residual: mean of squares over the test-function axis,
/// shape `(n_cells,)`.
pub fn residual(
    test: &TestFunctions,
    field: &QuadField,
    forcing: &Tensor,
    inverse_params: &InverseParams,
) -> Result<Tensor> {
    Ok(mean_over_tests(&residual_matrix(
        test,
        field,
        forcing,
        inverse_params,
    )?))
}
