//! Narrow interface over reverse-mode differentiation.
//!
//! The residual kernels stay autodiff-agnostic pure functions; everything
//! that touches the tape lives here. A [`GradientScope`] watches an input
//! batch and answers gradient requests by `(output, input)` pair, so the
//! training step can ask for the derivative of each output field with respect
//! to the full coordinate vector and slice the result per coordinate.

use tch::Tensor;

/// One differentiation scope: watch inputs, request gradients, drop.
#[derive(Debug, Clone, Copy)]
pub struct GradientScope {
    create_graph: bool,
}

impl GradientScope {
    /// Scope for plain first derivatives; the returned gradients carry no
    /// graph of their own.
    pub fn new() -> Self {
        Self {
            create_graph: false,
        }
    }

    /// Scope for nested differentiation: the returned gradients stay attached
    /// to the graph, so a later backward pass through a loss built from them
    /// reaches the network parameters.
    pub fn for_training() -> Self {
        Self { create_graph: true }
    }

    /// Marks an input batch as watched and returns the handle to differentiate
    /// against. Forward passes must use the returned tensor.
    pub fn watch(&self, input: &Tensor) -> Tensor {
        input.set_requires_grad(true)
    }

    /// Gradient of `output` with respect to `input`, shape of `input`.
    ///
    /// `output` holds one scalar per batch row, so summing before the backward
    /// pass yields exactly the row-wise gradients. The graph is kept so the
    /// same scope can serve one request per output field.
    pub fn gradient(&self, output: &Tensor, input: &Tensor) -> Tensor {
        let summed = output.sum(output.kind());
        let mut grads = Tensor::run_backward(&[&summed], &[input], true, self.create_graph);
        grads.swap_remove(0)
    }
}

impl Default for GradientScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind, Tensor};

    #[test]
    fn gradient_of_quadratic_is_linear() {
        let scope = GradientScope::new();
        let x = scope.watch(&Tensor::from_slice(&[1.0f64, 2.0, 3.0]).reshape(&[3, 1]));
        let y = x.square();
        let grad = scope.gradient(&y, &x);
        assert_eq!(grad.size(), vec![3, 1]);
        for (i, expected) in [2.0, 4.0, 6.0].iter().enumerate() {
            assert!((grad.double_value(&[i as i64, 0]) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn training_scope_supports_repeated_requests() {
        let scope = GradientScope::for_training();
        let x = scope.watch(&Tensor::ones(&[4, 2], (Kind::Double, Device::Cpu)));
        let u = x.narrow(1, 0, 1) * x.narrow(1, 1, 1);
        let v = x.narrow(1, 0, 1).square();
        // Two gradient requests against the same forward pass.
        let du = scope.gradient(&u, &x);
        let dv = scope.gradient(&v, &x);
        assert!((du.double_value(&[0, 0]) - 1.0).abs() < 1e-12);
        assert!((dv.double_value(&[0, 0]) - 2.0).abs() < 1e-12);
    }
}
