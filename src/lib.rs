//! Gradients of observation misfits for staggered-grid Stokes solvers, and
//! the inversion drivers built on them.
//!
//! A forward solver computes velocities and pressures `$\vec{x}$` from
//! material parameters `$\vec{p}$` by driving the nonlinear residual
//! `$\vec{r}(\vec{x}, \vec{p})$` to zero. Observations of `$\vec{x}$` (at
//! points, on the free surface or in the whole domain) define an objective
//! that is either the projected solution
//! ```math
//! F(\vec{p}) = \vec{P}^\top\vec{x}(\vec{p})
//! ```
//! or the least-squares misfit against a comparison field `$\vec{c}$`,
//! ```math
//! F(\vec{p}) = \frac{1}{2s}\sum_j |P_j|\,\bigl(x_j(\vec{p}) - c_j\bigr)^2,
//! ```
//! with an optional normalization `$s$`.
//!
//! # Gradients
//!
//! Every parameter is differentiated in one of two ways:
//!
//! - **adjoint**: a single linear solve `$\mathbf{J}^\top\vec{\psi} = \partial F/\partial\vec{x}$`
//!   serves all adjoint parameters, each of which then costs one residual
//!   evaluation, see [`adjoint`].
//! - **finite differences**: one full forward solve per parameter on top of a
//!   shared reference solve, see [`finite_difference`]. Used for parameters
//!   the residual does not expose a derivative for, e.g. thermal properties.
//!
//! [`InversionContext::evaluate`] combines both into one gradient vector.
//! Optionally the density gradient of every cell replaces the scalar
//! gradients, and [`ScalingLaw`] turns a single gradient evaluation into a
//! power-law fit of the observed velocity.
//!
//! # Inversion
//!
//! The gradients drive either [`SteepestDescent`], a per-parameter step
//! factor scheme with backtracking, or [`QuasiNewton`], a limited-memory
//! BFGS that respects parameter bounds. Both minimize any
//! [`ObjectiveProblem`], not only inversion runs:
//!
//! ```
//! use adjoint_inversion::{ObjectiveProblem, Result, SteepestDescent};
//! use nalgebra::DVector;
//!
//! /// `F(p) = (p - 3)^2 + 1`
//! struct Shifted;
//!
//! impl ObjectiveProblem<f64> for Shifted {
//!     fn evaluate(&mut self, p: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
//!         let d = p[0] - 3.0;
//!         Ok((d * d + 1.0, DVector::from_element(1, 2.0 * d)))
//!     }
//! }
//!
//! let report = SteepestDescent::new()
//!     .with_max_iterations(20)
//!     .minimize(DVector::from_element(1, 1.0), &mut Shifted)
//!     .unwrap();
//! assert!(report.objective_function < report.initial_objective_function);
//! assert!(report.parameters[0] > 1.0);
//! ```
//!
//! # Running an inversion
//!
//! Implement [`ForwardSolver`] for the discretization, describe the run in an
//! [`InversionConfig`] (usually loaded from JSON) and hand both together with
//! the [`MaterialDatabase`] to an [`InversionContext`]. The configured
//! [`RunMode`] then decides whether [`InversionContext::run`] evaluates a
//! single gradient, inverts, or stores a synthetic comparison field.
//!
//! # Derivative checking
//!
//! [`differentiate_numerically`] approximates the gradient of any
//! [`ObjectiveProblem`] and is meant for checking the gradients above on
//! small problems.
pub mod adjoint;
pub mod comm;
pub mod config;
mod descent;
pub mod error;
pub mod finite_difference;
pub mod forward;
pub mod grid;
mod inversion;
pub mod krylov;
pub mod material;
pub mod objective;
pub mod observation;
pub mod parameters;
mod problem;
mod quasi_newton;
pub mod scaling;
pub mod scaling_law;
mod utils;

pub use comm::{Communicator, SingleProcess};
pub use config::{InversionConfig, ObservationBlock, ParameterBlock, RunMode};
pub use descent::SteepestDescent;
pub use error::{InversionError, Result};
pub use forward::{ForwardSolution, ForwardSolver};
pub use inversion::{load_comparison, save_comparison, Evaluation, InversionContext, RunReport};
pub use material::{MaterialDatabase, Phase};
pub use problem::{MinimizationReport, ObjectiveProblem, TerminationReason};
pub use quasi_newton::QuasiNewton;
pub use scaling_law::ScalingLaw;

pub use utils::{derivative, differentiate_numerically};
