//! Variational (weak-form) residual kernels.
//!
//! Each submodule implements one PDE family's weak form as a fixed sequence of
//! bilinear-form contractions over precomputed test-function matrices. The
//! shared primitive is [`contract`]: a batched matrix-vector product that
//! integrates a solution field (or one of its derivatives) against every test
//! function of every mesh element in one shot.
//!
//! Kernels are pure: given identical inputs they produce identical outputs,
//! touch no shared state, and propagate NaN/Inf unguarded.

use tch::Tensor;

use crate::error::{Error, Result};
use crate::params::{BilinearParams, InverseParams};

pub mod convection_diffusion;
pub mod helmholtz;
pub mod maxwell;
pub mod poisson_inverse;

/// Test-function matrices for one problem setup, supplied by the external
/// mesh/quadrature collaborator and treated as read-only.
///
/// Each matrix has shape `(n_elements, n_test_functions, n_quad_points)`;
/// quadrature weights and element Jacobians are already folded in, so the
/// contraction against a point field approximates the element integral.
#[derive(Debug)]
pub struct TestFunctions {
    /// Test-function values at quadrature points.
    pub shape_val: Tensor,
    /// Test-function x-derivatives at quadrature points.
    pub grad_x: Tensor,
    /// Test-function y-derivatives at quadrature points.
    pub grad_y: Tensor,
}

impl TestFunctions {
    pub fn new(shape_val: Tensor, grad_x: Tensor, grad_y: Tensor) -> Result<Self> {
        let dims = shape_val.size();
        if dims.len() != 3 {
            return Err(Error::shape(
                "test-function matrix, expected (n_elements, n_test_fns, n_quad_pts)",
                vec![-1, -1, -1],
                dims,
            ));
        }
        for (name, mat) in [("grad_x", &grad_x), ("grad_y", &grad_y)] {
            if mat.size() != dims {
                return Err(Error::shape(
                    format!("test-function {name} matrix"),
                    dims.clone(),
                    mat.size(),
                ));
            }
        }
        Ok(Self {
            shape_val,
            grad_x,
            grad_y,
        })
    }

    pub fn n_elements(&self) -> i64 {
        self.shape_val.size()[0]
    }

    pub fn n_test_functions(&self) -> i64 {
        self.shape_val.size()[1]
    }

    pub fn n_quad_points(&self) -> i64 {
        self.shape_val.size()[2]
    }
}

/// A scalar field and its first derivatives at quadrature points, grouped by
/// mesh element; every component has shape `(n_elements, n_quad_points)`.
#[derive(Debug)]
pub struct QuadField {
    pub value: Tensor,
    pub grad_x: Tensor,
    pub grad_y: Tensor,
    /// Temporal derivative, present only for transient problems.
    pub grad_t: Option<Tensor>,
}

impl QuadField {
    pub fn new(value: Tensor, grad_x: Tensor, grad_y: Tensor) -> Self {
        Self {
            value,
            grad_x,
            grad_y,
            grad_t: None,
        }
    }

    pub fn with_time(mut self, grad_t: Tensor) -> Self {
        self.grad_t = Some(grad_t);
        self
    }

    /// The time derivative, or a shape error for transient kernels invoked on
    /// a purely spatial field trace.
    pub fn time_derivative(&self, kernel: &'static str) -> Result<&Tensor> {
        self.grad_t.as_ref().ok_or_else(|| {
            Error::shape(
                format!("{kernel} grad_t component, missing: fields must be traced over (x, y, t)"),
                self.value.size(),
                vec![],
            )
        })
    }
}

/// Checks that every component of `field` matches the `(E, Q)` layout of the
/// test-function matrices.
pub(crate) fn validate_field(
    test: &TestFunctions,
    field: &QuadField,
    kernel: &'static str,
) -> Result<()> {
    let expected = vec![test.n_elements(), test.n_quad_points()];
    let mut components = vec![
        ("solution", &field.value),
        ("grad_x", &field.grad_x),
        ("grad_y", &field.grad_y),
    ];
    if let Some(grad_t) = &field.grad_t {
        components.push(("grad_t", grad_t));
    }
    for (name, tensor) in components {
        if tensor.size() != expected {
            return Err(Error::shape(
                format!("{kernel} {name} field"),
                expected.clone(),
                tensor.size(),
            ));
        }
    }
    Ok(())
}

/// Checks that the forcing tensor broadcasts against the `(T, E)` residual
/// matrix, so the subtraction never reaches the tensor backend with
/// irreconcilable sizes.
pub(crate) fn validate_forcing(
    test: &TestFunctions,
    forcing: &Tensor,
    kernel: &'static str,
) -> Result<()> {
    let expected = vec![test.n_test_functions(), test.n_elements()];
    let dims = forcing.size();
    let broadcastable = dims.len() <= 2
        && dims
            .iter()
            .rev()
            .zip(expected.iter().rev())
            .all(|(d, e)| d == e || *d == 1);
    if !broadcastable {
        return Err(Error::shape(
            format!("{kernel} forcing tensor must broadcast to (n_test_fns, n_elements)"),
            expected,
            dims,
        ));
    }
    Ok(())
}

/// Weighted test-function contraction: for a point field `d` of shape `(E, Q)`
/// and a test matrix `m` of shape `(E, T, Q)`, computes
/// `sum_q m[e, t, q] * d[e, q]` and transposes the `(E, T)` result to
/// `(T, E)` so that forcing tensors stored `(T, E)` align for subtraction.
pub fn contract(test_mat: &Tensor, point_field: &Tensor) -> Tensor {
    test_mat
        .matmul(&point_field.unsqueeze(-1))
        .squeeze_dim(-1)
        .transpose(0, 1)
}

/// Per-element reduction of a `(T, E)` residual matrix: mean of squares over
/// the test-function axis, shape `(E,)`.
pub fn mean_over_tests(residual_matrix: &Tensor) -> Tensor {
    residual_matrix
        .square()
        .mean_dim(Some([0i64].as_slice()), false, residual_matrix.kind())
}

/// The closed set of supported PDE families. Each variant owns its coefficient
/// schema and composition order; dispatch happens here rather than through a
/// class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdeKernel {
    /// Poisson inverse problem with an unknown constant diffusion coefficient.
    PoissonInverse,
    /// Convection-diffusion inverse problem with a spatially varying unknown
    /// diffusion coefficient.
    ConvectionDiffusionInverse,
    /// Helmholtz equation with diffusion scaling and wave number.
    Helmholtz,
    /// Transient 2-D TE Maxwell system, three coupled fields over (x, y, t).
    MaxwellTe,
}

impl PdeKernel {
    pub fn name(&self) -> &'static str {
        match self {
            PdeKernel::PoissonInverse => poisson_inverse::KERNEL,
            PdeKernel::ConvectionDiffusionInverse => convection_diffusion::KERNEL,
            PdeKernel::Helmholtz => helmholtz::KERNEL,
            PdeKernel::MaxwellTe => maxwell::KERNEL,
        }
    }

    /// Number of coupled output fields the kernel consumes.
    pub fn n_fields(&self) -> usize {
        match self {
            PdeKernel::MaxwellTe => 3,
            _ => 1,
        }
    }

    /// Input-coordinate dimensionality: (x, y) or (x, y, t).
    pub fn input_dim(&self) -> i64 {
        match self {
            PdeKernel::MaxwellTe => 3,
            _ => 2,
        }
    }

    /// Reduces the kernel's residual to the scalar PDE loss.
    ///
    /// Single-field kernels return the mean over elements of the per-element
    /// residual; the coupled Maxwell system sums the per-field scalars. The
    /// first sub-kernel failure aborts the whole computation unmodified.
    pub fn pde_loss(
        &self,
        test: &TestFunctions,
        fields: &[QuadField],
        forcing: &[Tensor],
        bilinear: &BilinearParams,
        inverse: Option<&InverseParams>,
    ) -> Result<Tensor> {
        let wanted = self.n_fields();
        if fields.len() != wanted || forcing.len() != wanted {
            return Err(Error::shape(
                format!("{} field/forcing count", self.name()),
                vec![wanted as i64, wanted as i64],
                vec![fields.len() as i64, forcing.len() as i64],
            ));
        }
        match self {
            PdeKernel::PoissonInverse => {
                let inverse = inverse.ok_or_else(|| Error::MissingCoefficient {
                    name: "eps".to_string(),
                    kernel: poisson_inverse::KERNEL,
                })?;
                let cells = poisson_inverse::residual(test, &fields[0], &forcing[0], inverse)?;
                Ok(cells.mean(cells.kind()))
            }
            PdeKernel::ConvectionDiffusionInverse => {
                let inverse = inverse.ok_or_else(|| Error::MissingCoefficient {
                    name: "eps".to_string(),
                    kernel: convection_diffusion::KERNEL,
                })?;
                let cells = convection_diffusion::residual(
                    test, &fields[0], &forcing[0], bilinear, inverse,
                )?;
                Ok(cells.mean(cells.kind()))
            }
            PdeKernel::Helmholtz => {
                let cells = helmholtz::residual(test, &fields[0], &forcing[0], bilinear)?;
                Ok(cells.mean(cells.kind()))
            }
            PdeKernel::MaxwellTe => maxwell::residual_scalar(
                test,
                &fields[0],
                &fields[1],
                &fields[2],
                [&forcing[0], &forcing[1], &forcing[2]],
                bilinear,
            ),
        }
    }
}
