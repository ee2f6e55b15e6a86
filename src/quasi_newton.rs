//! Limited-memory quasi-Newton minimization, projected onto bounds.
//!
//! The iteration itself is [`argmin`]'s L-BFGS with a More-Thuente line
//! search. This module adapts an [`ObjectiveProblem`] to it: bounds are
//! handled by evaluating the problem at the projection of every trial point,
//! repeated requests for the same point are served from the last evaluation,
//! and the evaluation budget is enforced here since argmin only counts
//! iterations.
use std::cell::RefCell;

use argmin::core::{
    CostFunction, Error as ArgminError, Executor, Gradient, State, TerminationReason as ArgminReason,
    TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::error::{InversionError, Result};
use crate::problem::{project, MinimizationReport, ObjectiveProblem, TerminationReason};

/// L-BFGS on the box of the problem bounds.
///
/// The inverse Hessian is approximated from the last
/// [`memory`](#method.with_memory) pairs of steps and gradient changes, see
///
/// > J. Nocedal. Updating quasi-Newton matrices with limited storage.
/// > Mathematics of Computation, Vol. 35, No. 151 (1980), pp. 773-782.
///
/// If the problem reports bounds, it is minimized as `$F(P(\vec{p}))$` where
/// `$P$` projects onto the box. Gradient components of variables held on a
/// bound with the gradient pointing outwards are zeroed; without bounds this
/// is plain L-BFGS.
///
/// The gradient and function tolerances default to `$10^{-30}$` so that in
/// practice the run ends when the objective falls below its
/// [lower bound](#method.with_objective_lower_bound), the line search fails,
/// or the evaluation budget is spent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuasiNewton {
    memory: usize,
    gradient_tolerance: f64,
    function_tolerance: f64,
    objective_lower_bound: f64,
    max_evaluations: usize,
}

impl QuasiNewton {
    pub fn new() -> Self {
        Self {
            memory: 5,
            gradient_tolerance: 1e-30,
            function_tolerance: 1e-30,
            objective_lower_bound: 1e-5,
            max_evaluations: 1500,
        }
    }

    /// Set the number of correction pairs kept.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{memory} = 0$`.
    pub fn with_memory(self, memory: usize) -> Self {
        assert!(memory > 0, "memory must be > 0");
        Self { memory, ..self }
    }

    /// Stop once the norm of the projected gradient is below `gradient_tolerance`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{gradient\_tolerance} < 0$`.
    pub fn with_gradient_tolerance(self, gradient_tolerance: f64) -> Self {
        assert!(gradient_tolerance >= 0.0, "gradient_tolerance must be >= 0");
        Self {
            gradient_tolerance,
            ..self
        }
    }

    /// Stop once an iteration changes `$F$` by less than `function_tolerance`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{function\_tolerance} < 0$`.
    pub fn with_function_tolerance(self, function_tolerance: f64) -> Self {
        assert!(function_tolerance >= 0.0, "function_tolerance must be >= 0");
        Self {
            function_tolerance,
            ..self
        }
    }

    /// Stop once `$F$` drops to `objective_lower_bound`.
    pub fn with_objective_lower_bound(self, objective_lower_bound: f64) -> Self {
        Self {
            objective_lower_bound,
            ..self
        }
    }

    /// Set the maximal number of objective evaluations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_evaluations} = 0$`.
    pub fn with_max_evaluations(self, max_evaluations: usize) -> Self {
        assert!(max_evaluations > 0, "max_evaluations must be > 0");
        Self {
            max_evaluations,
            ..self
        }
    }

    /// Minimize `problem` starting at `initial`.
    ///
    /// Errors of the problem are passed through unchanged. A failed line
    /// search is not an error; the best point evaluated so far is reported.
    pub fn minimize<O>(&self, initial: DVector<f64>, problem: &mut O) -> Result<MinimizationReport<f64>>
    where
        O: ObjectiveProblem<f64>,
    {
        let bounds = problem.bounds();
        let mut start = initial;
        project(&mut start, bounds.as_ref());

        let line_search: MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64> = MoreThuenteLineSearch::new();
        let solver: LBFGS<_, Vec<f64>, Vec<f64>, f64> = LBFGS::new(line_search, self.memory)
            .with_tolerance_grad(self.gradient_tolerance)?
            .with_tolerance_cost(self.function_tolerance)?;

        let log = RefCell::new(EvaluationLog::default());
        let outcome = {
            let projected = Projected {
                problem: RefCell::new(problem),
                bounds,
                log: &log,
                max_evaluations: self.max_evaluations,
            };
            Executor::new(projected, solver)
                .configure(|state| {
                    state
                        .param(start.as_slice().to_vec())
                        .max_iters(self.max_evaluations as u64)
                        .target_cost(self.objective_lower_bound)
                })
                .run()
                .map(|result| result.state().get_termination_status().clone())
        };
        let EvaluationLog {
            evaluations,
            initial,
            history,
            best,
            improvements,
            failure,
            budget_spent,
            ..
        } = log.into_inner();

        if let Some(error) = failure {
            return Err(error);
        }
        let Some(best) = best else {
            return Err(match outcome {
                Err(error) => error.into(),
                Ok(_) => InversionError::Optimizer("no objective evaluation".into()),
            });
        };
        let termination = match outcome {
            Ok(TerminationStatus::Terminated(ArgminReason::TargetCostReached)) => {
                TerminationReason::ObjectiveBelowBound
            }
            Ok(TerminationStatus::Terminated(ArgminReason::MaxItersReached)) => TerminationReason::IterationCap,
            Ok(_) if best.gradient.norm() < self.gradient_tolerance => TerminationReason::GradientTolerance,
            Ok(_) => TerminationReason::FunctionTolerance,
            Err(_) if budget_spent => {
                warn!(evaluations, "evaluation budget spent");
                TerminationReason::IterationCap
            }
            Err(error) => {
                warn!(%error, objective = best.objective, "quasi-Newton line search failed, keeping the best parameters");
                TerminationReason::LineSearchDiverged
            }
        };
        info!(
            termination = ?termination,
            evaluations,
            objective = best.objective,
            parameters = ?best.parameters.as_slice(),
            "quasi-Newton finished"
        );
        Ok(MinimizationReport {
            termination,
            iterations: improvements + 1,
            number_of_evaluations: evaluations,
            objective_function: best.objective,
            initial_objective_function: initial.unwrap_or(best.objective),
            parameters: best.parameters,
            history,
        })
    }
}

impl Default for QuasiNewton {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Evaluated {
    parameters: DVector<f64>,
    objective: f64,
    /// Projected gradient.
    gradient: DVector<f64>,
}

#[derive(Default)]
struct EvaluationLog {
    evaluations: usize,
    initial: Option<f64>,
    history: Vec<f64>,
    best: Option<Evaluated>,
    last: Option<Evaluated>,
    improvements: usize,
    failure: Option<InversionError>,
    budget_spent: bool,
}

impl EvaluationLog {
    fn record(&mut self, evaluated: Evaluated) {
        self.evaluations += 1;
        let f = evaluated.objective;
        let initial = *self.initial.get_or_insert(f);
        let relative = if initial == 0.0 { 0.0 } else { f / initial };
        self.history.push(relative);
        debug!(evaluation = self.evaluations, objective = f, relative, "quasi-Newton evaluation");

        match &self.best {
            None => self.best = Some(evaluated.clone()),
            Some(best) if f < best.objective => {
                self.improvements += 1;
                info!(
                    improvement = self.improvements,
                    objective = f,
                    relative,
                    parameters = ?evaluated.parameters.as_slice(),
                    "quasi-Newton improvement"
                );
                self.best = Some(evaluated.clone());
            }
            Some(_) => {}
        }
        self.last = Some(evaluated);
    }
}

/// An [`ObjectiveProblem`] seen through the projection onto its bounds.
struct Projected<'a, O> {
    problem: RefCell<&'a mut O>,
    bounds: Option<(DVector<f64>, DVector<f64>)>,
    log: &'a RefCell<EvaluationLog>,
    max_evaluations: usize,
}

impl<O: ObjectiveProblem<f64>> Projected<'_, O> {
    fn evaluate(&self, param: &[f64]) -> std::result::Result<(f64, Vec<f64>), ArgminError> {
        let mut p = DVector::from_column_slice(param);
        project(&mut p, self.bounds.as_ref());

        let mut log = self.log.borrow_mut();
        if let Some(last) = log.last.as_ref().filter(|last| last.parameters == p) {
            return Ok((last.objective, last.gradient.as_slice().to_vec()));
        }
        if log.evaluations >= self.max_evaluations {
            log.budget_spent = true;
            return Err(ArgminError::msg("evaluation budget spent"));
        }
        let (objective, gradient) = match ObjectiveProblem::evaluate(&mut **self.problem.borrow_mut(), &p) {
            Ok(evaluated) => evaluated,
            Err(error) => {
                let message = error.to_string();
                log.failure = Some(error);
                return Err(ArgminError::msg(message));
            }
        };
        let gradient = projected_gradient(&p, gradient, self.bounds.as_ref());
        let result = (objective, gradient.as_slice().to_vec());
        log.record(Evaluated {
            parameters: p,
            objective,
            gradient,
        });
        Ok(result)
    }
}

impl<O: ObjectiveProblem<f64>> CostFunction for Projected<'_, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        self.evaluate(param).map(|(objective, _)| objective)
    }
}

impl<O: ObjectiveProblem<f64>> Gradient for Projected<'_, O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        self.evaluate(param).map(|(_, gradient)| gradient)
    }
}

/// Zero the components of variables held on a bound by an outward gradient.
fn projected_gradient(
    p: &DVector<f64>,
    mut gradient: DVector<f64>,
    bounds: Option<&(DVector<f64>, DVector<f64>)>,
) -> DVector<f64> {
    if let Some((lower, upper)) = bounds {
        for i in 0..p.len() {
            if (p[i] <= lower[i] && gradient[i] > 0.0) || (p[i] >= upper[i] && gradient[i] < 0.0) {
                gradient[i] = 0.0;
            }
        }
    }
    gradient
}
