//! Discrete adjoint gradients.
//!
//! For a converged forward solution `$\vec{x}$` with nonlinear residual
//! `$\vec{r}(\vec{x}, \vec{p}) = 0$`, the gradient of the objective with
//! respect to the parameters is
//! ```math
//! \frac{dF}{dp_i} = -\vec{\psi}^\top \frac{\partial\vec{r}}{\partial p_i},
//! \qquad \mathbf{J}^\top\vec{\psi} = \frac{\partial F}{\partial\vec{x}}.
//! ```
//! One linear solve yields `$\vec{\psi}$` for all parameters at once, and
//! each `$\partial\vec{r}/\partial p_i$` costs a single residual evaluation
//! at the converged solution with the parameter perturbed.
//!
//! The adjoint system is solved with the Jacobian of the last nonlinear
//! iteration as it comes out of the forward solver, *not* its transpose.
//! The gradients are therefore only exact for (nearly) symmetric Jacobians,
//! as produced by incompressible Stokes discretizations.
use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::comm::Communicator;
use crate::error::{InversionError, Result};
use crate::forward::{ForwardSolution, ForwardSolver};
use crate::krylov::GmresConfig;
use crate::material::MaterialDatabase;
use crate::objective::ObjectiveState;
use crate::parameters::ParameterRegistry;
use crate::scaling::GradientMethod;

/// Outcome of the adjoint linear solve.
///
/// A solve that did not converge is not an error; its best iterate is used
/// and `converged` is reported as `false`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjointReport {
    pub converged: bool,
    pub iterations: usize,
    pub residual: f64,
}

/// Solve for the adjoint vector `$\vec{\psi}$`.
pub fn adjoint_vector<S: ForwardSolver + ?Sized>(
    solver: &S,
    forward: &ForwardSolution,
    objective: &ObjectiveState,
    config: &GmresConfig,
) -> Result<(DVector<f64>, AdjointReport)> {
    let n = forward.solution.len();
    if forward.jacobian.nrows() != n || forward.jacobian.ncols() != n {
        return Err(InversionError::DimensionMismatch {
            expected: n,
            found: forward.jacobian.nrows(),
        });
    }
    if objective.derivative.len() != n {
        return Err(InversionError::DimensionMismatch {
            expected: n,
            found: objective.derivative.len(),
        });
    }
    let outcome = solver.krylov_solve(&forward.jacobian, &objective.derivative, config);
    let report = AdjointReport {
        converged: outcome.converged,
        iterations: outcome.iterations,
        residual: outcome.residual,
    };
    if outcome.converged {
        info!(
            iterations = outcome.iterations,
            residual = outcome.residual,
            "adjoint solve converged"
        );
    } else {
        warn!(
            iterations = outcome.iterations,
            residual = outcome.residual,
            "adjoint solve did not converge, continuing with the last iterate"
        );
    }
    Ok((outcome.solution, report))
}

/// Fill the adjoint entries of `gradient`.
///
/// Each parameter is perturbed by `$\varepsilon p_i$` in a private copy of
/// `db`; `db` itself is never modified. `scale` converts the gradients to
/// physical units (see [`GradientMode::gradient_scale`](crate::objective::GradientMode::gradient_scale)).
#[allow(clippy::too_many_arguments)]
pub fn adjoint_gradients<S: ForwardSolver + ?Sized>(
    solver: &S,
    forward: &ForwardSolution,
    objective: &ObjectiveState,
    registry: &ParameterRegistry,
    db: &MaterialDatabase,
    epsilon: f64,
    scale: f64,
    config: &GmresConfig,
    comm: &impl Communicator,
    gradient: &mut DVector<f64>,
) -> Result<Option<AdjointReport>> {
    let indices = registry.indices(GradientMethod::Adjoint);
    if indices.is_empty() {
        return Ok(None);
    }
    if gradient.len() != registry.len() {
        return Err(InversionError::DimensionMismatch {
            expected: registry.len(),
            found: gradient.len(),
        });
    }
    let (psi, report) = adjoint_vector(solver, forward, objective, config)?;

    for i in indices {
        let Some(p) = registry.get(i) else { continue };
        if p.value == 0.0 {
            return Err(InversionError::ZeroParameterValue {
                name: p.id.name.clone(),
                phase: p.id.phase,
            });
        }
        let h = p.value * epsilon;
        let perturbed = db.with_value(&p.id.name, p.id.phase, p.physical(p.value + h))?;
        let residual = solver.evaluate_residual(&forward.solution, &perturbed)?;
        let dr = (residual - &forward.residual) / h;
        gradient[i] = -comm.sum(psi.dot(&dr)) * scale;
        debug!(parameter = %p.id, gradient = gradient[i], "adjoint gradient");
    }
    Ok(Some(report))
}

/// Gradient of the objective with respect to the density of every cell.
///
/// Takes the place of the scalar gradients when field sensitivity is
/// requested. Cells with zero density get a zero gradient.
#[allow(clippy::too_many_arguments)]
pub fn density_field_gradient<S: ForwardSolver + ?Sized>(
    solver: &S,
    forward: &ForwardSolution,
    objective: &ObjectiveState,
    db: &MaterialDatabase,
    epsilon: f64,
    scale: f64,
    config: &GmresConfig,
    comm: &impl Communicator,
) -> Result<(DVector<f64>, AdjointReport)> {
    let (psi, report) = adjoint_vector(solver, forward, objective, config)?;
    let cells = solver.grid().cell_count();
    let mut field = DVector::zeros(cells);
    for cell in 0..cells {
        let density = solver.cell_density(cell, db)?;
        if density == 0.0 {
            continue;
        }
        let h = density * epsilon;
        let residual = solver.residual_with_cell_density(&forward.solution, db, cell, density + h)?;
        let dr = (residual - &forward.residual) / h;
        // psi is distributed like the solution; the dot product is local
        field[cell] = -psi.dot(&dr) * scale;
    }
    let total = comm.sum(field.iter().map(|g| g.abs()).sum());
    info!(cells, l1_norm = total, "density sensitivity field");
    Ok((field, report))
}
