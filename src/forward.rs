//! Interface of the nonlinear forward solver.
use nalgebra::{DMatrix, DVector};

use crate::error::{InversionError, Result};
use crate::grid::{FreeSurface, StaggeredGrid, Subdomain};
use crate::krylov::{gmres, GmresConfig, KrylovOutcome};
use crate::material::MaterialDatabase;

/// State of a converged (or abandoned) nonlinear solve.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardSolution {
    pub solution: DVector<f64>,
    /// Nonlinear residual at `solution`.
    pub residual: DVector<f64>,
    /// Jacobian of the last nonlinear iteration.
    pub jacobian: DMatrix<f64>,
    pub converged: bool,
}

/// A discretized PDE solver the inversion drives.
///
/// All values come in through the [`MaterialDatabase`] passed to each call;
/// implementations must not keep references to it between calls.
pub trait ForwardSolver {
    /// Grid of the local subdomain.
    fn grid(&self) -> &StaggeredGrid;

    /// Coordinate box owned by this rank.
    fn subdomain(&self) -> Subdomain {
        Subdomain::whole(self.grid())
    }

    /// Length of the current timestep, in solver units.
    fn timestep(&self) -> f64;

    /// Index of the current timestep.
    fn step(&self) -> usize {
        0
    }

    /// Full nonlinear solve with the values of `db`.
    fn solve(&mut self, db: &MaterialDatabase) -> Result<ForwardSolution>;

    /// One evaluation of the nonlinear residual at `solution`, without solving.
    fn evaluate_residual(&self, solution: &DVector<f64>, db: &MaterialDatabase) -> Result<DVector<f64>>;

    /// Solve the adjoint system with `operator` standing in for the transposed Jacobian.
    fn krylov_solve(&self, operator: &DMatrix<f64>, rhs: &DVector<f64>, config: &GmresConfig) -> KrylovOutcome {
        gmres(operator, rhs, config)
    }

    fn free_surface(&self) -> Option<&FreeSurface> {
        None
    }

    /// Density of `cell` under `db`.
    fn cell_density(&self, _cell: usize, _db: &MaterialDatabase) -> Result<f64> {
        Err(InversionError::ForwardSolve(
            "solver does not expose per-cell densities".into(),
        ))
    }

    /// Residual at `solution` with the density of `cell` replaced by `density`.
    fn residual_with_cell_density(
        &self,
        _solution: &DVector<f64>,
        _db: &MaterialDatabase,
        _cell: usize,
        _density: f64,
    ) -> Result<DVector<f64>> {
        Err(InversionError::ForwardSolve(
            "solver does not expose per-cell residuals".into(),
        ))
    }
}
