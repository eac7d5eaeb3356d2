//! Synthetic problem setup on the unit square.
//!
//! Stands in for the external mesh/quadrature collaborator: builds the
//! test-function matrices (quadrature weights and element Jacobians folded
//! in), the matching interior point batch, boundary rings and manufactured
//! solution traces that the CLI feeds into the training loop. Assembly runs
//! on `ndarray` and converts to tensors once.

use std::f64::consts::PI;

use ndarray::{Array2, Array3};
use tch::{Device, Kind, Tensor};

use crate::error::{Error, Result};
use crate::physics::{QuadField, TestFunctions};

/// Tabulated Gauss-Legendre rule on (-1, 1).
pub fn gauss_legendre(n: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    match n {
        2 => Ok((
            vec![-0.5773502691896257, 0.5773502691896257],
            vec![1.0, 1.0],
        )),
        3 => Ok((
            vec![-0.7745966692414834, 0.0, 0.7745966692414834],
            vec![0.5555555555555556, 0.8888888888888888, 0.5555555555555556],
        )),
        4 => Ok((
            vec![
                -0.8611363115940526,
                -0.3399810435848563,
                0.3399810435848563,
                0.8611363115940526,
            ],
            vec![
                0.3478548451374538,
                0.6521451548625461,
                0.6521451548625461,
                0.3478548451374538,
            ],
        )),
        5 => Ok((
            vec![
                -0.9061798459386640,
                -0.5384693101056831,
                0.0,
                0.5384693101056831,
                0.9061798459386640,
            ],
            vec![
                0.2369268850561891,
                0.4786286704993665,
                0.5688888888888889,
                0.4786286704993665,
                0.2369268850561891,
            ],
        )),
        order => Err(Error::UnsupportedQuadrature { order }),
    }
}

/// Test-function matrices and the matching interior quadrature points for a
/// uniform `ne x ne` element partition of the unit square.
#[derive(Debug)]
pub struct QuadratureGrid {
    pub test: TestFunctions,
    /// Quadrature points, `(E * Q, d)`, element-major then quadrature-major,
    /// matching the reshape convention of the training step.
    pub points: Tensor,
    pub n_elements: i64,
    pub n_test: i64,
    pub n_quad: i64,
}

/// Builds the grid with sine test functions `sin(iπξ)sin(jπη)` in element-
/// local coordinates, `i, j = 1..=order`, vanishing on element edges.
pub fn unit_square_grid(
    ne: usize,
    nq: usize,
    order: usize,
    kind: Kind,
    device: Device,
) -> Result<QuadratureGrid> {
    let (nodes, weights) = gauss_legendre(nq)?;
    let e_total = ne * ne;
    let q_total = nq * nq;
    let t_total = order * order;
    let h = 1.0 / ne as f64;

    let mut shape_val = Array3::<f64>::zeros((e_total, t_total, q_total));
    let mut grad_x = Array3::<f64>::zeros((e_total, t_total, q_total));
    let mut grad_y = Array3::<f64>::zeros((e_total, t_total, q_total));
    let mut points = Array2::<f64>::zeros((e_total * q_total, 2));

    for ex in 0..ne {
        for ey in 0..ne {
            let e = ex * ne + ey;
            for qx in 0..nq {
                for qy in 0..nq {
                    let q = qx * nq + qy;
                    // Element-local coordinates in (0, 1).
                    let xi = 0.5 * (nodes[qx] + 1.0);
                    let eta = 0.5 * (nodes[qy] + 1.0);
                    let w = weights[qx] * weights[qy] * 0.25 * h * h;

                    points[[e * q_total + q, 0]] = ex as f64 * h + h * xi;
                    points[[e * q_total + q, 1]] = ey as f64 * h + h * eta;

                    for ti in 1..=order {
                        for tj in 1..=order {
                            let t = (ti - 1) * order + (tj - 1);
                            let sx = (ti as f64 * PI * xi).sin();
                            let cx = (ti as f64 * PI * xi).cos();
                            let sy = (tj as f64 * PI * eta).sin();
                            let cy = (tj as f64 * PI * eta).cos();
                            shape_val[[e, t, q]] = w * sx * sy;
                            grad_x[[e, t, q]] = w * ti as f64 * PI / h * cx * sy;
                            grad_y[[e, t, q]] = w * tj as f64 * PI / h * sx * cy;
                        }
                    }
                }
            }
        }
    }

    let test = TestFunctions::new(
        tensor_from_iter(shape_val.iter(), &[e_total as i64, t_total as i64, q_total as i64], kind, device),
        tensor_from_iter(grad_x.iter(), &[e_total as i64, t_total as i64, q_total as i64], kind, device),
        tensor_from_iter(grad_y.iter(), &[e_total as i64, t_total as i64, q_total as i64], kind, device),
    )?;
    let points = tensor_from_iter(points.iter(), &[(e_total * q_total) as i64, 2], kind, device);

    Ok(QuadratureGrid {
        test,
        points,
        n_elements: e_total as i64,
        n_test: t_total as i64,
        n_quad: q_total as i64,
    })
}

/// Extends a spatial grid into `(x, y, t)` by a Gauss rule on (0, 1): each
/// quadrature point is replicated at `nt` time levels, and the time weights
/// fold into the test matrices so the contraction integrates over time too.
pub fn extrude_time(grid: &QuadratureGrid, nt: usize) -> Result<QuadratureGrid> {
    let (nodes, weights) = gauss_legendre(nt)?;
    let times: Vec<f64> = nodes.iter().map(|x| 0.5 * (x + 1.0)).collect();
    let time_weights: Vec<f64> = weights.iter().map(|w| 0.5 * w).collect();

    let kind = grid.points.kind();
    let device = grid.points.device();
    let nt = nt as i64;
    let (e, t, q) = (grid.n_elements, grid.n_test, grid.n_quad);

    let wt = Tensor::from_slice(&time_weights).to_kind(kind).to_device(device);
    let fold = |mat: &Tensor| -> Tensor {
        // (E, T, Q, 1) * (nt,) -> (E, T, Q, nt) -> (E, T, Q * nt)
        (mat.unsqueeze(-1) * &wt).reshape(&[e, t, q * nt])
    };
    let test = TestFunctions::new(
        fold(&grid.test.shape_val),
        fold(&grid.test.grad_x),
        fold(&grid.test.grad_y),
    )?;

    // Each spatial point repeated nt times, consecutive in the quadrature
    // ordering, with the time column appended.
    let spatial = grid
        .points
        .unsqueeze(1)
        .repeat(&[1, nt, 1])
        .reshape(&[e * q * nt, 2]);
    let t_col = Tensor::from_slice(&times)
        .to_kind(kind)
        .to_device(device)
        .repeat(&[e * q])
        .unsqueeze(1);
    let points = Tensor::cat(&[spatial, t_col], 1);

    Ok(QuadratureGrid {
        test,
        points,
        n_elements: e,
        n_test: t,
        n_quad: q * nt,
    })
}

/// Trace of the manufactured solution `u*(x, y) = sin(πx) sin(πy)` at the
/// grid's quadrature points, shape `(E, Q)` per component.
pub fn sine_product_trace(grid: &QuadratureGrid) -> QuadField {
    let (e, q) = (grid.n_elements, grid.n_quad);
    let x = grid.points.narrow(1, 0, 1).reshape(&[e, q]);
    let y = grid.points.narrow(1, 1, 1).reshape(&[e, q]);
    let sx = (PI * &x).sin();
    let cx = (PI * &x).cos();
    let sy = (PI * &y).sin();
    let cy = (PI * &y).cos();
    QuadField::new(&sx * &sy, PI * (&cx * &sy), PI * (&sx * &cy))
}

/// Per-quadrature-point diffusion coefficient `ε(x, y) = 0.5 + 0.5 x y`
/// used as the ground truth of the varying-coefficient inverse demo.
pub fn varying_coefficient(grid: &QuadratureGrid) -> Tensor {
    let (e, q) = (grid.n_elements, grid.n_quad);
    let x = grid.points.narrow(1, 0, 1).reshape(&[e, q]);
    let y = grid.points.narrow(1, 1, 1).reshape(&[e, q]);
    0.5 * (&x * &y) + 0.5
}

/// Uniformly sampled points along the four edges of the unit square,
/// `(4 * n_per_edge, 2)`.
pub fn boundary_ring(n_per_edge: usize, kind: Kind, device: Device) -> Tensor {
    let mut coords = Vec::with_capacity(8 * n_per_edge);
    for i in 0..n_per_edge {
        let s = i as f64 / (n_per_edge - 1).max(1) as f64;
        coords.extend_from_slice(&[s, 0.0]);
        coords.extend_from_slice(&[s, 1.0]);
        coords.extend_from_slice(&[0.0, s]);
        coords.extend_from_slice(&[1.0, s]);
    }
    Tensor::from_slice(&coords)
        .reshape(&[4 * n_per_edge as i64, 2])
        .to_kind(kind)
        .to_device(device)
}

/// The boundary ring replicated at the given time levels, `(4n * |times|, 3)`.
pub fn ring_through_time(
    n_per_edge: usize,
    times: &[f64],
    kind: Kind,
    device: Device,
) -> Tensor {
    let ring = boundary_ring(n_per_edge, kind, device);
    let rows = ring.size()[0];
    let nt = times.len() as i64;
    let spatial = ring.unsqueeze(1).repeat(&[1, nt, 1]).reshape(&[rows * nt, 2]);
    let t_col = Tensor::from_slice(times)
        .to_kind(kind)
        .to_device(device)
        .repeat(&[rows])
        .unsqueeze(1);
    Tensor::cat(&[spatial, t_col], 1)
}

/// An `n x n` interior grid at a fixed time level, `(n², 3)`; used for
/// initial-condition constraints at `t = 0`.
pub fn plane_at_time(n: usize, time: f64, kind: Kind, device: Device) -> Tensor {
    let mut coords = Vec::with_capacity(3 * n * n);
    for i in 0..n {
        for j in 0..n {
            coords.push((i + 1) as f64 / (n + 1) as f64);
            coords.push((j + 1) as f64 / (n + 1) as f64);
            coords.push(time);
        }
    }
    Tensor::from_slice(&coords)
        .reshape(&[(n * n) as i64, 3])
        .to_kind(kind)
        .to_device(device)
}

fn tensor_from_iter<'a>(
    values: impl Iterator<Item = &'a f64>,
    shape: &[i64],
    kind: Kind,
    device: Device,
) -> Tensor {
    let flat: Vec<f64> = values.copied().collect();
    Tensor::from_slice(&flat)
        .reshape(shape)
        .to_kind(kind)
        .to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CoefficientMap;
    use crate::physics::poisson_inverse;

    #[test]
    fn unsupported_quadrature_order_is_rejected() {
        assert!(matches!(
            gauss_legendre(7),
            Err(Error::UnsupportedQuadrature { order: 7 })
        ));
    }

    #[test]
    fn grid_shapes_are_consistent() {
        let grid = unit_square_grid(3, 3, 2, Kind::Double, Device::Cpu).unwrap();
        assert_eq!(grid.n_elements, 9);
        assert_eq!(grid.n_test, 4);
        assert_eq!(grid.n_quad, 9);
        assert_eq!(grid.test.shape_val.size(), vec![9, 4, 9]);
        assert_eq!(grid.points.size(), vec![81, 2]);
    }

    /// Folded weights make the value contraction an element integral:
    /// for u = 1 and v = sin(πξ)sin(πη) on an element of size h², the exact
    /// integral is h² (2/π)².
    #[test]
    fn value_contraction_approximates_the_element_integral() {
        let grid = unit_square_grid(2, 5, 1, Kind::Double, Device::Cpu).unwrap();
        let ones = Tensor::ones(&[grid.n_elements, grid.n_quad], (Kind::Double, Device::Cpu));
        let integral = crate::physics::contract(&grid.test.shape_val, &ones);
        let h = 0.5;
        let exact = h * h * (2.0 / PI) * (2.0 / PI);
        for e in 0..grid.n_elements {
            assert!((integral.double_value(&[0, e]) - exact).abs() < 1e-6);
        }
    }

    /// The manufactured forcing built from the kernel itself yields a zero
    /// residual at the manufactured solution.
    #[test]
    fn manufactured_forcing_closes_the_loop() {
        let grid = unit_square_grid(2, 4, 2, Kind::Double, Device::Cpu).unwrap();
        let trace = sine_product_trace(&grid);
        let inverse = CoefficientMap::new().with_scalar("eps", 2.0);
        let zero = Tensor::zeros(&[1, 1], (Kind::Double, Device::Cpu));

        let forcing =
            poisson_inverse::residual_matrix(&grid.test, &trace, &zero, &inverse).unwrap();
        let cells = poisson_inverse::residual(&grid.test, &trace, &forcing, &inverse).unwrap();
        assert!(f64::try_from(&cells.abs().max()).unwrap() < 1e-12);
    }

    #[test]
    fn time_extrusion_replicates_points_and_quadrature() {
        let grid = unit_square_grid(2, 2, 1, Kind::Double, Device::Cpu).unwrap();
        let st = extrude_time(&grid, 3).unwrap();
        assert_eq!(st.n_quad, grid.n_quad * 3);
        assert_eq!(st.points.size(), vec![grid.n_elements * st.n_quad, 3]);
        assert_eq!(
            st.test.shape_val.size(),
            vec![grid.n_elements, grid.n_test, st.n_quad]
        );
        // Spatial columns repeat for consecutive time levels.
        let x0 = st.points.double_value(&[0, 0]);
        let x1 = st.points.double_value(&[1, 0]);
        assert!((x0 - x1).abs() < 1e-12);
        // Time weights sum to the interval length.
        let (_, w) = gauss_legendre(3).unwrap();
        assert!((w.iter().sum::<f64>() * 0.5 - 1.0).abs() < 1e-12);
    }
}
