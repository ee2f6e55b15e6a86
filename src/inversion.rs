//! The state of one inversion run and the hybrid gradient evaluation.
//!
//! An [`InversionContext`] owns everything a run mutates: the parameter
//! registry, the material database, the observation operator and the
//! forward solver. Each evaluation
//!
//! 1. writes the current parameters into the material database,
//! 2. computes the finite-difference gradients, which need a reference solve
//!    and one perturbed solve per parameter,
//! 3. solves the forward problem once more at the unperturbed parameters,
//!    evaluates the objective on that solution and computes the adjoint
//!    gradients from it.
//!
//! The returned objective therefore always belongs to the unperturbed
//! parameters, and the finite-difference and adjoint columns fill disjoint
//! entries of the gradient.
use std::fs;
use std::path::Path;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adjoint::{adjoint_gradients, density_field_gradient, AdjointReport};
use crate::comm::{Communicator, SingleProcess};
use crate::config::{InversionConfig, RunMode};
use crate::descent::SteepestDescent;
use crate::error::{InversionError, Result};
use crate::finite_difference::fd_gradients;
use crate::forward::{ForwardSolution, ForwardSolver};
use crate::material::MaterialDatabase;
use crate::objective::{self, ObjectiveState};
use crate::observation::ObservationOperator;
use crate::parameters::ParameterRegistry;
use crate::problem::{MinimizationReport, ObjectiveProblem};
use crate::quasi_newton::QuasiNewton;
use crate::scaling_law::ScalingLaw;

#[cfg(test)]
mod test_evaluate;
#[cfg(test)]
pub(crate) mod test_helpers;
#[cfg(test)]
mod test_run;

/// Objective and gradient at one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Objective in physical units.
    pub objective: f64,
    /// `$dF/dp$`, in registry order.
    pub gradient: DVector<f64>,
    /// `None` when no parameter uses the adjoint.
    pub adjoint: Option<AdjointReport>,
    /// Objective of the finite-difference reference solve, if there was one.
    pub fd_reference: Option<f64>,
    /// Per-cell density gradient of field-sensitivity runs.
    pub density_gradient: Option<DVector<f64>>,
}

/// What [`InversionContext::run`] produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    /// Last evaluation of the run.
    pub evaluation: Option<Evaluation>,
    pub minimization: Option<MinimizationReport<f64>>,
    pub scaling_law: Option<ScalingLaw>,
    /// Solution of a synthetic forward run.
    pub comparison: Option<DVector<f64>>,
}

/// A solution saved for later cost-function runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ComparisonField {
    dof_count: usize,
    values: Vec<f64>,
}

/// Store `solution` as a comparison field.
pub fn save_comparison(path: impl AsRef<Path>, solution: &DVector<f64>) -> Result<()> {
    let field = ComparisonField {
        dof_count: solution.len(),
        values: solution.as_slice().to_vec(),
    };
    fs::write(path.as_ref(), serde_json::to_string(&field)?)?;
    info!(path = %path.as_ref().display(), dofs = field.dof_count, "comparison field saved");
    Ok(())
}

/// Load a comparison field with `dof_count` entries.
pub fn load_comparison(path: impl AsRef<Path>, dof_count: usize) -> Result<DVector<f64>> {
    let field: ComparisonField = serde_json::from_str(&fs::read_to_string(path.as_ref())?)?;
    if field.dof_count != dof_count || field.values.len() != dof_count {
        return Err(InversionError::DimensionMismatch {
            expected: dof_count,
            found: field.values.len(),
        });
    }
    info!(path = %path.as_ref().display(), dofs = dof_count, "comparison field loaded");
    Ok(DVector::from_vec(field.values))
}

/// Forward solve at the values of `db` followed by the objective.
fn solve_objective<S: ForwardSolver + ?Sized>(
    solver: &mut S,
    observations: &mut ObservationOperator,
    comparison: Option<&DVector<f64>>,
    config: &InversionConfig,
    cost_scale: f64,
    comm: &impl Communicator,
    db: &MaterialDatabase,
) -> Result<(ForwardSolution, ObjectiveState)> {
    let forward = solver.solve(db)?;
    if !forward.converged {
        warn!("forward solve did not converge, using the last iterate");
    }
    let projection = observations.project(solver.grid(), &forward.solution, solver.free_surface(), comm)?;
    let reference = comparison.unwrap_or(&projection.comparison);
    let state = objective::evaluate(
        config.gradient_mode,
        &forward.solution,
        &projection.projection,
        reference,
        cost_scale,
        &config.scaling,
        comm,
    )?;
    debug!(objective = state.value, converged = forward.converged, "forward solve");
    Ok((forward, state))
}

/// Everything one inversion run works on.
pub struct InversionContext<S, C = SingleProcess> {
    config: InversionConfig,
    registry: ParameterRegistry,
    materials: MaterialDatabase,
    observations: ObservationOperator,
    solver: S,
    comm: C,
    comparison: Option<DVector<f64>>,
    cost_scale: f64,
    evaluations: usize,
    initial_objective: Option<f64>,
    last_evaluation: Option<Evaluation>,
}

impl<S: ForwardSolver> InversionContext<S, SingleProcess> {
    /// Context of a run on a single process.
    pub fn new(config: InversionConfig, materials: MaterialDatabase, solver: S) -> Result<Self> {
        Self::with_communicator(config, materials, solver, SingleProcess)
    }
}

impl<S: ForwardSolver, C: Communicator> InversionContext<S, C> {
    /// Validate `config` and set up the run. No forward solve happens here.
    pub fn with_communicator(
        config: InversionConfig,
        materials: MaterialDatabase,
        solver: S,
        comm: C,
    ) -> Result<Self> {
        config.validate()?;
        let registry = ParameterRegistry::from_config(&config, &materials)?;
        let mut observations = ObservationOperator::from_config(&config);
        observations.update_residency(&solver.subdomain());

        let comparison = match (&config.comparison_file, config.use_observation_targets, config.mode) {
            (_, _, RunMode::SyntheticForwardRun) | (_, true, _) => None,
            (Some(path), false, _) => Some(load_comparison(path, solver.grid().dof_count())?),
            (None, false, _) => {
                return Err(InversionError::Config(
                    "comparison_file is required when observation targets are not used".into(),
                ))
            }
        };
        let cost_scale = config
            .cost_scaling
            .factor(&observations.local_targets(), &comm);
        info!(
            parameters = registry.len(),
            observations = observations.points().len(),
            mode = ?config.mode,
            gradient_mode = ?config.gradient_mode,
            cost_scale,
            "inversion set up"
        );
        Ok(Self {
            config,
            registry,
            materials,
            observations,
            solver,
            comm,
            comparison,
            cost_scale,
            evaluations: 0,
            initial_objective: None,
            last_evaluation: None,
        })
    }

    pub fn config(&self) -> &InversionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn materials(&self) -> &MaterialDatabase {
        &self.materials
    }

    pub fn observations(&self) -> &ObservationOperator {
        &self.observations
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    /// Number of completed evaluations.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.last_evaluation.as_ref()
    }

    /// Normalization of the cost function, `1` when none applies.
    pub fn cost_scale(&self) -> f64 {
        self.cost_scale
    }

    /// Objective and gradient at `values`.
    ///
    /// On success the registry and the material database hold `values`.
    pub fn evaluate(&mut self, values: &DVector<f64>) -> Result<Evaluation> {
        // every gradient perturbs multiplicatively
        if let Some((p, _)) = self.registry.iter().zip(values.iter()).find(|(_, v)| **v == 0.0) {
            return Err(InversionError::ZeroParameterValue {
                name: p.id.name.clone(),
                phase: p.id.phase,
            });
        }
        self.registry.set_values(values)?;
        self.registry.apply(&mut self.materials)?;

        let Self {
            config,
            registry,
            materials,
            observations,
            solver,
            comm,
            comparison,
            cost_scale,
            ..
        } = self;
        let (config, registry, comm) = (&*config, &*registry, &*comm);
        let (comparison, cost_scale) = (comparison.as_ref(), *cost_scale);
        let mut gradient = DVector::zeros(registry.len());

        let fd_reference = fd_gradients(registry, materials, config.fd_epsilon, &mut gradient, |db| {
            solve_objective(solver, observations, comparison, config, cost_scale, comm, db)
                .map(|(_, state)| state.value)
        })?;

        let materials = &*materials;
        let (forward, state) =
            solve_objective(solver, observations, comparison, config, cost_scale, comm, materials)?;
        let solver = &*solver;
        let scale = config.gradient_mode.gradient_scale(&config.scaling);

        let (adjoint, density_gradient) = if config.field_sensitivity {
            let (field, report) = density_field_gradient(
                solver,
                &forward,
                &state,
                materials,
                config.adjoint_epsilon,
                scale,
                &config.adjoint_solver,
                comm,
            )?;
            (Some(report), Some(field))
        } else {
            let report = adjoint_gradients(
                solver,
                &forward,
                &state,
                registry,
                materials,
                config.adjoint_epsilon,
                scale,
                &config.adjoint_solver,
                comm,
                &mut gradient,
            )?;
            (report, None)
        };

        if observations.advect(solver.step(), solver.timestep(), solver.grid(), &forward.solution)? {
            debug!(step = solver.step(), "observation points advected");
        }

        self.evaluations += 1;
        let initial = *self.initial_objective.get_or_insert(state.value);
        info!(
            evaluation = self.evaluations,
            objective = state.value,
            relative = state.value / initial,
            gradient = ?gradient.as_slice(),
            "objective and gradient"
        );
        let evaluation = Evaluation {
            objective: state.value,
            gradient,
            adjoint,
            fd_reference,
            density_gradient,
        };
        self.last_evaluation = Some(evaluation.clone());
        Ok(evaluation)
    }

    /// Execute the configured [`RunMode`].
    pub fn run(&mut self) -> Result<RunReport> {
        let mode = self.config.mode;
        let mut report = RunReport {
            mode,
            evaluation: None,
            minimization: None,
            scaling_law: None,
            comparison: None,
        };
        let initial = self.registry.values();
        match mode {
            RunMode::AdjointGradients => {
                let evaluation = self.evaluate(&initial)?;
                if self.config.compute_scaling_law {
                    let law = ScalingLaw::compute(
                        &self.registry,
                        &evaluation.gradient,
                        evaluation.objective,
                        self.config.reference_density,
                    )?;
                    if self.comm.is_root() {
                        law.write_report_file(
                            &self.config.scaling_law_file,
                            self.observations.points(),
                            &self.config.scaling,
                            &self.materials,
                        )?;
                    }
                    report.scaling_law = Some(law);
                }
                report.evaluation = Some(evaluation);
            }
            RunMode::GradientDescent => {
                let descent = SteepestDescent::from_config(&self.config);
                let minimization = descent.minimize(initial, self)?;
                self.finish(&minimization)?;
                report.minimization = Some(minimization);
                report.evaluation = self.last_evaluation.clone();
            }
            RunMode::QuasiNewton => {
                let minimization = QuasiNewton::new().minimize(initial, self)?;
                self.finish(&minimization)?;
                report.minimization = Some(minimization);
                report.evaluation = self.last_evaluation.clone();
            }
            RunMode::SyntheticForwardRun => {
                let forward = self.solver.solve(&self.materials)?;
                if !forward.converged {
                    warn!("synthetic forward solve did not converge");
                }
                if let (Some(path), true) = (&self.config.comparison_file, self.comm.is_root()) {
                    save_comparison(path, &forward.solution)?;
                }
                report.comparison = Some(forward.solution);
            }
        }
        Ok(report)
    }

    /// Leave the best parameters of a minimization in the registry and the
    /// material database.
    fn finish(&mut self, minimization: &MinimizationReport<f64>) -> Result<()> {
        self.registry.set_values(&minimization.parameters)?;
        self.registry.apply(&mut self.materials)?;
        info!(
            termination = ?minimization.termination,
            iterations = minimization.iterations,
            evaluations = minimization.number_of_evaluations,
            objective = minimization.objective_function,
            "inversion finished"
        );
        for p in self.registry.iter() {
            info!(parameter = %p.id, value = p.value, "inverted parameter");
        }
        Ok(())
    }
}

impl<S: ForwardSolver, C: Communicator> ObjectiveProblem<f64> for InversionContext<S, C> {
    fn evaluate(&mut self, p: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let evaluation = InversionContext::evaluate(self, p)?;
        Ok((evaluation.objective, evaluation.gradient))
    }

    fn bounds(&self) -> Option<(DVector<f64>, DVector<f64>)> {
        if self.registry.has_bounds() {
            Some((self.registry.lower_bounds(), self.registry.upper_bounds()))
        } else {
            None
        }
    }
}
