//! Steepest descent with an adaptive per-parameter step and backtracking.
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;
use tracing::{debug, info, warn};

use crate::config::InversionConfig;
use crate::error::Result;
use crate::problem::{project, MinimizationReport, ObjectiveProblem, TerminationReason};

#[cfg(test)]
mod test_examples;
#[cfg(test)]
mod test_line_search;
#[cfg(test)]
mod test_step_factor;

/// Steepest descent for expensive objectives.
///
/// Every parameter has its own step factor `$c_i$` and is updated by
/// ```math
///   \Delta p_i = -c_i\,\frac{\partial F}{\partial p_i}.
/// ```
/// On the first iteration `$c_i$` is chosen so that the update has the size
/// `$s\,|p_i|$` (or `$s$` for `$p_i = 0$`), where `$s$` is the
/// [initial step scale](#method.with_initial_step_scale). After every
/// accepted step the factors grow by a fixed ratio, up to a cap. A step that
/// increases `$F$` is halved (more precisely, scaled by the
/// [shrink factor](#method.with_shrink)) until `$F$` no longer increases.
///
/// When the problem reports bounds, every trial point is projected onto them.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SteepestDescent<F> {
    tolerance: F,
    growth: F,
    shrink: F,
    max_step_factor: F,
    initial_step_scale: F,
    max_iterations: usize,
    max_line_search_iterations: usize,
}

impl<F: RealField + Float> SteepestDescent<F> {
    pub fn new() -> Self {
        Self {
            tolerance: convert(1e-10),
            growth: convert(2.0),
            shrink: convert(0.5),
            max_step_factor: convert(100.0),
            initial_step_scale: convert(0.1),
            max_iterations: 50,
            max_line_search_iterations: 20,
        }
    }

    /// Set the relative objective `$F/F_{\text{ini}}$` at which to stop.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{tolerance} < 0$`.
    pub fn with_tolerance(self, tolerance: F) -> Self {
        assert!(!tolerance.is_negative(), "tolerance must be >= 0");
        Self { tolerance, ..self }
    }

    /// Set the factor by which the step factors grow after an accepted step.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{growth} < 1$`.
    pub fn with_growth(self, growth: F) -> Self {
        assert!(growth >= F::one(), "growth must be >= 1");
        Self { growth, ..self }
    }

    /// Set the factor applied to a rejected step.
    ///
    /// # Panics
    ///
    /// Panics unless `$0 < \mathtt{shrink} < 1$`.
    pub fn with_shrink(self, shrink: F) -> Self {
        assert!(
            shrink.is_positive() && shrink < F::one(),
            "shrink must lie in (0, 1)"
        );
        Self { shrink, ..self }
    }

    /// Set the cap on the step factors.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_step\_factor} \leq 0$`.
    pub fn with_max_step_factor(self, max_step_factor: F) -> Self {
        assert!(max_step_factor.is_positive(), "max_step_factor must be > 0");
        Self {
            max_step_factor,
            ..self
        }
    }

    /// Set the size of the first update relative to the parameters.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{initial\_step\_scale} \leq 0$`.
    pub fn with_initial_step_scale(self, initial_step_scale: F) -> Self {
        assert!(
            initial_step_scale.is_positive(),
            "initial_step_scale must be > 0"
        );
        Self {
            initial_step_scale,
            ..self
        }
    }

    /// Set the maximal number of accepted iterations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_iterations} = 0$`.
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        assert!(max_iterations > 0, "max_iterations must be > 0");
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the number of backtracking steps after which the search is
    /// considered diverged.
    pub fn with_max_line_search_iterations(self, max_line_search_iterations: usize) -> Self {
        Self {
            max_line_search_iterations,
            ..self
        }
    }

    /// Minimize `problem` starting at `initial`.
    ///
    /// Errors of the problem are passed through. Divergence of the line
    /// search is not an error; see [`TerminationReason`].
    pub fn minimize<O>(&self, initial: DVector<F>, problem: &mut O) -> Result<MinimizationReport<F>>
    where
        O: ObjectiveProblem<F>,
    {
        let bounds = problem.bounds();
        let mut p = initial;
        project(&mut p, bounds.as_ref());

        let (mut f, mut gradient) = problem.evaluate(&p)?;
        let mut report = MinimizationReport {
            termination: TerminationReason::IterationCap,
            iterations: 0,
            number_of_evaluations: 1,
            objective_function: f,
            initial_objective_function: f,
            parameters: p.clone(),
            history: Vec::new(),
        };
        let mut factor: Option<DVector<F>> = None;

        loop {
            // p is accepted
            report.iterations += 1;
            report.objective_function = f;
            report.parameters.copy_from(&p);
            let relative = if report.initial_objective_function.is_zero() {
                F::zero()
            } else {
                f / report.initial_objective_function
            };
            report.history.push(relative);
            info!(
                iteration = report.iterations,
                objective = ?f,
                relative = ?relative,
                parameters = ?p.as_slice(),
                "descent iteration"
            );
            if Float::abs(relative) < self.tolerance {
                report.termination = TerminationReason::ToleranceReached;
                return Ok(report);
            }
            if report.iterations >= self.max_iterations {
                warn!(iterations = report.iterations, "maximum number of descent iterations reached");
                report.termination = TerminationReason::IterationCap;
                return Ok(report);
            }

            let c = factor.get_or_insert_with(|| self.initial_factor(&p, &gradient));
            let mut step = -gradient.component_mul(&*c);
            for ci in c.iter_mut() {
                *ci = Float::min(*ci * self.growth, self.max_step_factor);
            }

            let p_old = p.clone();
            let f_old = f;
            let mut line_search = 0;
            loop {
                p = &p_old + &step;
                project(&mut p, bounds.as_ref());
                if p == p_old {
                    debug!(objective = ?f_old, "projected step vanished");
                    report.termination = TerminationReason::GradientTolerance;
                    return Ok(report);
                }
                let (f_new, g_new) = problem.evaluate(&p)?;
                report.number_of_evaluations += 1;
                f = f_new;
                gradient = g_new;
                // negated so that NaN is rejected
                if !(f > f_old) && !Float::is_nan(f) {
                    break;
                }
                line_search += 1;
                if line_search > self.max_line_search_iterations {
                    warn!(
                        backtracks = line_search - 1,
                        objective = ?report.objective_function,
                        "line search diverged, keeping the last accepted parameters"
                    );
                    report.termination = TerminationReason::LineSearchDiverged;
                    return Ok(report);
                }
                debug!(backtrack = line_search, objective = ?f, previous = ?f_old, "shrinking step");
                step *= self.shrink;
            }
        }
    }

    /// Step factors that make the first update `initial_step_scale` times
    /// the size of the parameters.
    fn initial_factor(&self, p: &DVector<F>, gradient: &DVector<F>) -> DVector<F> {
        DVector::from_iterator(
            p.len(),
            p.iter().zip(gradient.iter()).map(|(pi, gi)| {
                if gi.is_zero() {
                    F::zero()
                } else if pi.is_zero() {
                    Float::abs(self.initial_step_scale / *gi)
                } else {
                    Float::abs(self.initial_step_scale * *pi / *gi)
                }
            }),
        )
    }
}

impl SteepestDescent<f64> {
    /// Descent settings of a run.
    pub fn from_config(config: &InversionConfig) -> Self {
        Self::new()
            .with_tolerance(config.tolerance)
            .with_growth(config.line_search_growth)
            .with_shrink(config.line_search_shrink)
            .with_max_step_factor(config.max_step_factor)
            .with_initial_step_scale(config.initial_step_scale)
            .with_max_iterations(config.max_iterations.max(1))
            .with_max_line_search_iterations(config.max_line_search_iterations)
    }
}

impl<F: RealField + Float> Default for SteepestDescent<F> {
    fn default() -> Self {
        Self::new()
    }
}
