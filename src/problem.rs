use nalgebra::{DVector, RealField};

use crate::error::Result;

/// A scalar minimization problem with a gradient.
///
/// This is what [`SteepestDescent`](struct.SteepestDescent.html) and
/// [`QuasiNewton`](struct.QuasiNewton.html) need to drive an inversion.
/// Each call to `evaluate` is expected to be expensive (one or more forward
/// solves). The optimizers stop instead of re-evaluating a point they cannot
/// move away from.
pub trait ObjectiveProblem<F: RealField> {
    /// Objective `$F(\vec{p})$` and its gradient `$\nabla F(\vec{p})$`.
    fn evaluate(&mut self, p: &DVector<F>) -> Result<(F, DVector<F>)>;

    /// Lower and upper bounds, if the parameters are box constrained.
    fn bounds(&self) -> Option<(DVector<F>, DVector<F>)> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Reasons for an optimizer to stop.
///
/// None of these is an error: the report always carries the best point found.
pub enum TerminationReason {
    /// `$F/F_{\text{ini}}$` dropped below the tolerance.
    ToleranceReached,
    /// `$F$` dropped below the lower bound of the objective.
    ObjectiveBelowBound,
    /// The (projected) gradient vanished, or a projected step left the
    /// parameters unchanged.
    GradientTolerance,
    /// The last accepted step did not change `$F$` noticeably.
    FunctionTolerance,
    /// The maximum number of iterations or evaluations was reached.
    IterationCap,
    /// No acceptable point was found along the search direction within the
    /// allowed number of backtracking steps.
    LineSearchDiverged,
}

#[derive(Debug, Clone)]
/// Information about the minimization.
pub struct MinimizationReport<F: RealField> {
    pub termination: TerminationReason,
    /// Number of accepted iterates (steepest descent) or of improvements of
    /// the best point (quasi-Newton), including the starting point.
    pub iterations: usize,
    pub number_of_evaluations: usize,
    /// `$F$` at `parameters`.
    pub objective_function: F,
    pub initial_objective_function: F,
    /// Best accepted parameters.
    pub parameters: DVector<F>,
    /// `$F/F_{\text{ini}}$` per accepted iterate (steepest descent) or per
    /// evaluation (quasi-Newton).
    pub history: Vec<F>,
}

/// Project `p` onto the box `[lower, upper]`.
pub(crate) fn project<F: RealField + Copy>(p: &mut DVector<F>, bounds: Option<&(DVector<F>, DVector<F>)>) {
    if let Some((lower, upper)) = bounds {
        for ((x, lo), hi) in p.iter_mut().zip(lower.iter()).zip(upper.iter()) {
            if *x < *lo {
                *x = *lo;
            }
            if *x > *hi {
                *x = *hi;
            }
        }
    }
}
