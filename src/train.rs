//! Training step orchestration.
//!
//! One [`TrainingState`] owns the network, optimizer, input tensors and epoch
//! counter for a run; `step` walks the phases of one optimization step:
//! predict boundary/initial points, predict interior with nested
//! differentiation, assemble the PDE residual, combine the losses, apply one
//! optimizer update. All validation happens before any forward work, and the
//! optimizer only mutates parameters after every loss is assembled, so a
//! failing step leaves parameters and optimizer moments exactly as they were.

use tch::{nn, nn::OptimizerConfig, Tensor};

use crate::autodiff::GradientScope;
use crate::error::{Error, Result};
use crate::model::FieldNet;
use crate::params::BilinearParams;
use crate::physics::{PdeKernel, QuadField, TestFunctions};

/// Learning-rate schedule: constant, or staircase exponential decay as
/// `initial * decay_rate^(epoch / decay_steps)`.
#[derive(Debug, Clone, Copy)]
pub struct LearningRate {
    pub initial: f64,
    pub use_decay: bool,
    pub decay_steps: i64,
    pub decay_rate: f64,
}

impl LearningRate {
    pub fn constant(initial: f64) -> Self {
        Self {
            initial,
            use_decay: false,
            decay_steps: 1,
            decay_rate: 1.0,
        }
    }

    pub fn staircase(initial: f64, decay_steps: i64, decay_rate: f64) -> Self {
        Self {
            initial,
            use_decay: true,
            decay_steps,
            decay_rate,
        }
    }

    pub fn at_epoch(&self, epoch: i64) -> f64 {
        if !self.use_decay {
            return self.initial;
        }
        let intervals = epoch / self.decay_steps.max(1);
        self.initial * self.decay_rate.powi(intervals as i32)
    }
}

impl Default for LearningRate {
    fn default() -> Self {
        Self::constant(1e-3)
    }
}

/// Fixed (non-learned) weighting of the loss components plus the learning
/// rate configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    pub beta_boundary: f64,
    pub beta_initial: f64,
    pub learning_rate: LearningRate,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            beta_boundary: 10.0,
            beta_initial: 100.0,
            learning_rate: LearningRate::default(),
        }
    }
}

/// One initial-condition constraint: input points, target values, and the
/// output channel of the constrained field.
#[derive(Debug)]
pub struct InitialCondition {
    pub input: Tensor,
    pub actual: Tensor,
    pub field: i64,
}

/// Input tensors for one training run, supplied once and treated as
/// immutable for the run.
#[derive(Debug)]
pub struct TrainingInputs {
    /// Interior (collocation/quadrature) points, `(E * Q, d)`, element-major.
    pub interior: Tensor,
    /// Dirichlet boundary points, `(N_b, d)`.
    pub boundary_input: Tensor,
    /// Boundary target values for output channel 0, `(N_b, 1)`.
    pub boundary_actual: Tensor,
    /// Initial-condition sets; empty for stationary problems.
    pub initial: Vec<InitialCondition>,
}

/// The four named scalar losses reported per step.
#[derive(Debug, Clone, Copy)]
pub struct StepLosses {
    pub pde: f64,
    pub boundary: f64,
    pub initial: f64,
    pub total: f64,
}

/// Mutable state of one training run: network parameters, optimizer moments,
/// epoch counter and the run's input tensors. Exclusively owned; nothing else
/// writes to it.
#[derive(Debug)]
pub struct TrainingState {
    model: FieldNet,
    optimizer: nn::Optimizer,
    config: TrainConfig,
    inputs: TrainingInputs,
    epoch: i64,
}

impl TrainingState {
    pub fn new(model: FieldNet, config: TrainConfig, inputs: TrainingInputs) -> Result<Self> {
        validate_inputs(&model, &inputs)?;
        let optimizer = nn::Adam::default()
            .build(model.var_store(), config.learning_rate.initial)?;
        Ok(Self {
            model,
            optimizer,
            config,
            inputs,
            epoch: 0,
        })
    }

    pub fn model(&self) -> &FieldNet {
        &self.model
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Runs one full optimization step against the given kernel and problem
    /// data and returns the named losses.
    ///
    /// Either the whole update happens or none of it: every gradient is
    /// computed before the single optimizer call at the end.
    pub fn step(
        &mut self,
        kernel: &PdeKernel,
        test: &TestFunctions,
        forcing: &[Tensor],
        bilinear: &BilinearParams,
    ) -> Result<StepLosses> {
        let n_elements = test.n_elements();
        let n_quad = test.n_quad_points();
        let interior_dims = self.inputs.interior.size();
        if interior_dims[0] != n_elements * n_quad {
            return Err(Error::shape(
                "interior points must cover n_elements * n_quad quadrature points",
                vec![n_elements * n_quad, self.model.input_dim()],
                interior_dims,
            ));
        }
        if kernel.input_dim() != self.model.input_dim() {
            return Err(Error::shape(
                format!("{} input coordinates", kernel.name()),
                vec![kernel.input_dim()],
                vec![self.model.input_dim()],
            ));
        }
        if kernel.n_fields() as i64 != self.model.output_dim() {
            return Err(Error::shape(
                format!("{} output fields", kernel.name()),
                vec![kernel.n_fields() as i64],
                vec![self.model.output_dim()],
            ));
        }
        if forcing.len() != kernel.n_fields() {
            return Err(Error::shape(
                format!("{} forcing tensors", kernel.name()),
                vec![kernel.n_fields() as i64],
                vec![forcing.len() as i64],
            ));
        }

        let kind = self.model.kind();

        // Boundary and initial predictions; channel 0 carries the Dirichlet
        // constraint, initial sets name their own channel.
        let boundary_pred = self
            .model
            .forward(&self.inputs.boundary_input)
            .narrow(1, 0, 1);
        let boundary_loss = (boundary_pred - &self.inputs.boundary_actual)
            .square()
            .mean(kind);

        let mut initial_loss = boundary_loss.zeros_like();
        for ic in &self.inputs.initial {
            let pred = self.model.forward(&ic.input).narrow(1, ic.field, 1);
            initial_loss = initial_loss + (pred - &ic.actual).square().mean(kind);
        }

        // Interior prediction under a differentiation scope: one gradient
        // request per output field, sliced into per-coordinate partials.
        let scope = GradientScope::for_training();
        let interior = scope.watch(&self.inputs.interior);
        let prediction = self.model.forward(&interior);
        let transient = self.model.input_dim() > 2;

        let mut fields = Vec::with_capacity(kernel.n_fields());
        for channel in 0..kernel.n_fields() as i64 {
            let value = prediction.narrow(1, channel, 1);
            let grad = scope.gradient(&value, &interior);
            let mut field = QuadField::new(
                value.reshape(&[n_elements, n_quad]),
                grad.narrow(1, 0, 1).reshape(&[n_elements, n_quad]),
                grad.narrow(1, 1, 1).reshape(&[n_elements, n_quad]),
            );
            if transient {
                field = field.with_time(grad.narrow(1, 2, 1).reshape(&[n_elements, n_quad]));
            }
            fields.push(field);
        }

        let pde_loss =
            kernel.pde_loss(test, &fields, forcing, bilinear, self.model.inverse_params())?;

        let total = &pde_loss
            + self.config.beta_boundary * &boundary_loss
            + self.config.beta_initial * &initial_loss;

        let losses = StepLosses {
            pde: f64::try_from(&pde_loss)?,
            boundary: f64::try_from(&boundary_loss)?,
            initial: f64::try_from(&initial_loss)?,
            total: f64::try_from(&total)?,
        };

        // Everything below mutates state; nothing above did.
        if self.config.learning_rate.use_decay {
            self.optimizer
                .set_lr(self.config.learning_rate.at_epoch(self.epoch));
        }
        self.optimizer.backward_step(&total);
        self.epoch += 1;

        log::debug!(
            "epoch {}: pde={:.6e} boundary={:.6e} initial={:.6e} total={:.6e}",
            self.epoch,
            losses.pde,
            losses.boundary,
            losses.initial,
            losses.total
        );
        Ok(losses)
    }
}

fn validate_inputs(model: &FieldNet, inputs: &TrainingInputs) -> Result<()> {
    let d = model.input_dim();
    let interior = inputs.interior.size();
    if interior.len() != 2 || interior[1] != d {
        return Err(Error::shape(
            "interior input batch",
            vec![-1, d],
            interior,
        ));
    }
    let boundary = inputs.boundary_input.size();
    if boundary.len() != 2 || boundary[1] != d {
        return Err(Error::shape(
            "boundary input batch must share the interior coordinate dimension",
            vec![-1, d],
            boundary,
        ));
    }
    let actual = inputs.boundary_actual.size();
    if actual != vec![boundary[0], 1] {
        return Err(Error::shape(
            "boundary target values",
            vec![boundary[0], 1],
            actual,
        ));
    }
    for (i, ic) in inputs.initial.iter().enumerate() {
        let input = ic.input.size();
        if input.len() != 2 || input[1] != d {
            return Err(Error::shape(
                format!("initial-condition input batch {i}"),
                vec![-1, d],
                input,
            ));
        }
        let target = ic.actual.size();
        if target != vec![input[0], 1] {
            return Err(Error::shape(
                format!("initial-condition target values {i}"),
                vec![input[0], 1],
                target,
            ));
        }
        if ic.field < 0 || ic.field >= model.output_dim() {
            return Err(Error::shape(
                format!("initial-condition field channel {i}"),
                vec![model.output_dim() - 1],
                vec![ic.field],
            ));
        }
    }
    Ok(())
}
