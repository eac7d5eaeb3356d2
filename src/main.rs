use std::fs::OpenOptions;
use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use tch::{Device, Kind, Tensor};

use varpinn::model::{FieldNet, InverseSpec};
use varpinn::problem;
use varpinn::train::{InitialCondition, LearningRate, StepLosses, TrainConfig, TrainingInputs, TrainingState};
use varpinn::visualization;
use varpinn::{BilinearParams, CoefficientMap, PdeKernel, TestFunctions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PdeChoice {
    /// Poisson inverse problem with an unknown constant diffusion coefficient
    PoissonInverse,
    /// Convection-diffusion inverse problem with a varying coefficient field
    Cd2dInverse,
    /// Helmholtz equation (forward problem)
    Helmholtz,
    /// Transient 2-D TE Maxwell system (three coupled fields)
    Maxwell,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a network against a synthetic problem on the unit square
    Run {
        #[arg(long, value_enum, default_value = "poisson-inverse")]
        pde: PdeChoice,
        #[arg(short, long, default_value_t = 5000)]
        epochs: usize,
        /// Elements per side of the uniform partition
        #[arg(long, default_value_t = 4)]
        elements: usize,
        /// Gauss points per direction (2..=5)
        #[arg(long, default_value_t = 3)]
        quad: usize,
        /// Sine test functions per direction
        #[arg(long, default_value_t = 2)]
        test_order: usize,
        #[arg(long, default_value_t = 30)]
        hidden: i64,
        #[arg(long, default_value_t = 1e-3)]
        learning_rate: f64,
        /// Enable staircase exponential learning-rate decay
        #[arg(long, default_value_t = false)]
        decay: bool,
        #[arg(long, default_value_t = 1000)]
        decay_steps: i64,
        #[arg(long, default_value_t = 0.9)]
        decay_rate: f64,
        #[arg(long, default_value_t = 10.0)]
        beta_boundary: f64,
        #[arg(long, default_value_t = 100.0)]
        beta_initial: f64,
        #[arg(long, default_value = "training_log.csv")]
        log_file: String,
        /// Optional loss-curve PNG
        #[arg(long)]
        plot: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pde,
            epochs,
            elements,
            quad,
            test_order,
            hidden,
            learning_rate,
            decay,
            decay_steps,
            decay_rate,
            beta_boundary,
            beta_initial,
            log_file,
            plot,
        } => {
            let device = Device::cuda_if_available();
            let kind = Kind::Float;
            tch::manual_seed(42);

            let learning_rate = if decay {
                LearningRate::staircase(learning_rate, decay_steps, decay_rate)
            } else {
                LearningRate::constant(learning_rate)
            };
            let config = TrainConfig {
                beta_boundary,
                beta_initial,
                learning_rate,
            };

            let setup = build_problem(pde, elements, quad, test_order, hidden, kind, device)?;
            info!(
                "{}: {} elements, {} quad points, {} test functions",
                setup.kernel.name(),
                setup.test.n_elements(),
                setup.test.n_quad_points(),
                setup.test.n_test_functions()
            );

            let mut state = TrainingState::new(setup.model, config, setup.inputs)?;

            let mut log = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&log_file)
                .with_context(|| format!("unable to create {log_file}"))?;
            writeln!(log, "epoch,pde,boundary,initial,total")?;

            let mut history: Vec<(i64, StepLosses)> = Vec::new();
            for epoch in 0..epochs {
                let losses = state.step(&setup.kernel, &setup.test, &setup.forcing, &setup.bilinear)?;
                if epoch % 100 == 0 || epoch + 1 == epochs {
                    info!(
                        "epoch {}: pde={:.6e} boundary={:.6e} initial={:.6e} total={:.6e}",
                        epoch, losses.pde, losses.boundary, losses.initial, losses.total
                    );
                    writeln!(
                        log,
                        "{},{:.6e},{:.6e},{:.6e},{:.6e}",
                        epoch, losses.pde, losses.boundary, losses.initial, losses.total
                    )?;
                    history.push((epoch as i64, losses));
                }
            }

            if let Some(eps) = state
                .model()
                .inverse_params()
                .and_then(|p| p.get("eps", "report").ok())
            {
                info!("recovered coefficient mean: {:.6}", f64::try_from(&eps.mean(Kind::Double))?);
            }

            if let Some(path) = plot {
                visualization::draw_loss_curve(&history, &path)?;
            }
        }
    }

    Ok(())
}

/// Everything one training run needs: kernel, quadrature data, forcing,
/// coefficients, model and input tensors.
struct ProblemSetup {
    kernel: PdeKernel,
    test: TestFunctions,
    forcing: Vec<Tensor>,
    bilinear: BilinearParams,
    model: FieldNet,
    inputs: TrainingInputs,
}

fn build_problem(
    pde: PdeChoice,
    elements: usize,
    quad: usize,
    test_order: usize,
    hidden: i64,
    kind: Kind,
    device: Device,
) -> Result<ProblemSetup> {
    let grid = problem::unit_square_grid(elements, quad, test_order, kind, device)?;
    let zero = Tensor::zeros(&[1, 1], (kind, device));

    match pde {
        PdeChoice::PoissonInverse => {
            // Forcing manufactured from the exact solution with eps = 2; the
            // trainable coefficient starts at 1 and should recover 2.
            let trace = problem::sine_product_trace(&grid);
            let truth = CoefficientMap::new().with_scalar("eps", 2.0);
            let forcing =
                varpinn::physics::poisson_inverse::residual_matrix(&grid.test, &trace, &zero, &truth)?;

            let model = FieldNet::new(
                &[2, hidden, hidden, hidden, 1],
                kind,
                device,
                &[InverseSpec::new("eps", &[1], 1.0)],
            )?;
            let boundary_input = problem::boundary_ring(4 * elements, kind, device);
            let n_boundary = boundary_input.size()[0];
            let inputs = TrainingInputs {
                interior: grid.points.shallow_clone(),
                boundary_input,
                boundary_actual: Tensor::zeros(&[n_boundary, 1], (kind, device)),
                initial: vec![],
            };
            Ok(ProblemSetup {
                kernel: PdeKernel::PoissonInverse,
                test: grid.test,
                forcing: vec![forcing],
                bilinear: CoefficientMap::new(),
                model,
                inputs,
            })
        }
        PdeChoice::Cd2dInverse => {
            let trace = problem::sine_product_trace(&grid);
            let bilinear = CoefficientMap::new()
                .with_scalar("b_x", 1.0)
                .with_scalar("b_y", 0.5)
                .with_scalar("c", 1.0);
            let truth =
                CoefficientMap::new().with("eps", problem::varying_coefficient(&grid));
            let forcing = varpinn::physics::convection_diffusion::residual_matrix(
                &grid.test, &trace, &zero, &bilinear, &truth,
            )?;

            let model = FieldNet::new(
                &[2, hidden, hidden, hidden, 1],
                kind,
                device,
                &[InverseSpec::new(
                    "eps",
                    &[grid.n_elements, grid.n_quad],
                    0.8,
                )],
            )?;
            let boundary_input = problem::boundary_ring(4 * elements, kind, device);
            let n_boundary = boundary_input.size()[0];
            let inputs = TrainingInputs {
                interior: grid.points.shallow_clone(),
                boundary_input,
                boundary_actual: Tensor::zeros(&[n_boundary, 1], (kind, device)),
                initial: vec![],
            };
            Ok(ProblemSetup {
                kernel: PdeKernel::ConvectionDiffusionInverse,
                test: grid.test,
                forcing: vec![forcing],
                bilinear,
                model,
                inputs,
            })
        }
        PdeChoice::Helmholtz => {
            let trace = problem::sine_product_trace(&grid);
            let bilinear = CoefficientMap::new()
                .with_scalar("eps", 1.0)
                .with_scalar("k", 2.0);
            let forcing = varpinn::physics::helmholtz::residual_matrix(
                &grid.test, &trace, &zero, &bilinear,
            )?;

            let model = FieldNet::new(&[2, hidden, hidden, hidden, 1], kind, device, &[])?;
            let boundary_input = problem::boundary_ring(4 * elements, kind, device);
            let n_boundary = boundary_input.size()[0];
            let inputs = TrainingInputs {
                interior: grid.points.shallow_clone(),
                boundary_input,
                boundary_actual: Tensor::zeros(&[n_boundary, 1], (kind, device)),
                initial: vec![],
            };
            Ok(ProblemSetup {
                kernel: PdeKernel::Helmholtz,
                test: grid.test,
                forcing: vec![forcing],
                bilinear,
                model,
                inputs,
            })
        }
        PdeChoice::Maxwell => {
            // Source-free cavity: zero forcing, fields driven by the initial
            // Ez profile and zero Dirichlet walls.
            let grid = problem::extrude_time(&grid, 3)?;
            let bilinear = CoefficientMap::new()
                .with_scalar("eps", 1.0)
                .with_scalar("mu", 1.0);
            let forcing = vec![
                zero.shallow_clone(),
                zero.shallow_clone(),
                zero.shallow_clone(),
            ];

            let model = FieldNet::new(&[3, hidden, hidden, hidden, 3], kind, device, &[])?;
            let boundary_input =
                problem::ring_through_time(4 * elements, &[0.25, 0.5, 0.75], kind, device);
            let n_boundary = boundary_input.size()[0];

            let plane = problem::plane_at_time(8, 0.0, kind, device);
            let n_plane = plane.size()[0];
            let x = plane.narrow(1, 0, 1);
            let y = plane.narrow(1, 1, 1);
            let ez0 = (std::f64::consts::PI * &x).sin() * (std::f64::consts::PI * &y).sin();
            let zeros_plane = Tensor::zeros(&[n_plane, 1], (kind, device));

            let inputs = TrainingInputs {
                interior: grid.points.shallow_clone(),
                boundary_input,
                boundary_actual: Tensor::zeros(&[n_boundary, 1], (kind, device)),
                initial: vec![
                    InitialCondition {
                        input: plane.shallow_clone(),
                        actual: ez0,
                        field: 0,
                    },
                    InitialCondition {
                        input: plane.shallow_clone(),
                        actual: zeros_plane.shallow_clone(),
                        field: 1,
                    },
                    InitialCondition {
                        input: plane,
                        actual: zeros_plane,
                        field: 2,
                    },
                ],
            };
            Ok(ProblemSetup {
                kernel: PdeKernel::MaxwellTe,
                test: grid.test,
                forcing,
                bilinear,
                model,
                inputs,
            })
        }
    }
}
