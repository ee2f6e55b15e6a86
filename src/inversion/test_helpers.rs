use core::cell::RefCell;

use nalgebra::{DMatrix, DVector};

use crate::config::{InversionConfig, ObservationBlock, ParameterBlock};
use crate::error::{InversionError, Result};
use crate::forward::{ForwardSolution, ForwardSolver};
use crate::grid::{Axis, StaggeredGrid};
use crate::krylov::{gmres, GmresConfig, KrylovOutcome};
use crate::material::{MaterialDatabase, Phase};
use crate::observation::VelocityComponent;

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// Full solve with the `(rho, alpha)` it saw.
    Solve(f64, f64),
    Residual,
    Krylov,
}

/// `r(x) = eta A x - rho (1 + alpha) b` on a single cell.
///
/// `A` is symmetric, so the adjoint gradients are exact and
/// `x = rho (1 + alpha) / eta A^-1 b` scales linearly in every parameter.
pub struct MockForwardSolver {
    call_history: RefCell<Vec<MockCall>>,
    grid: StaggeredGrid,
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl MockForwardSolver {
    pub fn new() -> Self {
        let axis = || Axis::uniform(0.0, 1.0, 1).unwrap();
        let grid = StaggeredGrid::new(axis(), axis(), axis());
        let n = grid.dof_count();
        let a = DMatrix::from_fn(n, n, |i, j| match i.abs_diff(j) {
            0 => 4.0,
            1 => -1.0,
            _ => 0.0,
        });
        let b = DVector::from_fn(n, |i, _| 1.0 + 0.25 * i as f64);
        Self {
            call_history: RefCell::new(vec![]),
            grid,
            a,
            b,
        }
    }

    pub fn calls(&mut self) -> &[MockCall] {
        self.call_history.get_mut().as_slice()
    }

    pub fn solves(&mut self) -> Vec<(f64, f64)> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                MockCall::Solve(rho, alpha) => Some((*rho, *alpha)),
                _ => None,
            })
            .collect()
    }

    fn coefficients(db: &MaterialDatabase) -> Result<(f64, f64, f64)> {
        Ok((
            db.get("eta", Some(0))?,
            db.get("rho", Some(0))?,
            db.get("alpha", None)?,
        ))
    }
}

impl ForwardSolver for MockForwardSolver {
    fn grid(&self) -> &StaggeredGrid {
        &self.grid
    }

    fn timestep(&self) -> f64 {
        1.0
    }

    fn solve(&mut self, db: &MaterialDatabase) -> Result<ForwardSolution> {
        let (eta, rho, alpha) = Self::coefficients(db)?;
        self.call_history
            .borrow_mut()
            .push(MockCall::Solve(rho, alpha));
        let jacobian = &self.a * eta;
        let solution = jacobian
            .clone()
            .lu()
            .solve(&(&self.b * (rho * (1.0 + alpha))))
            .ok_or_else(|| InversionError::ForwardSolve("singular Jacobian".into()))?;
        let residual = &jacobian * &solution - &self.b * (rho * (1.0 + alpha));
        Ok(ForwardSolution {
            solution,
            residual,
            jacobian,
            converged: true,
        })
    }

    fn evaluate_residual(&self, solution: &DVector<f64>, db: &MaterialDatabase) -> Result<DVector<f64>> {
        self.call_history.borrow_mut().push(MockCall::Residual);
        let (eta, rho, alpha) = Self::coefficients(db)?;
        Ok(&self.a * solution * eta - &self.b * (rho * (1.0 + alpha)))
    }

    fn krylov_solve(&self, operator: &DMatrix<f64>, rhs: &DVector<f64>, config: &GmresConfig) -> KrylovOutcome {
        self.call_history.borrow_mut().push(MockCall::Krylov);
        gmres(operator, rhs, config)
    }

    fn cell_density(&self, _cell: usize, db: &MaterialDatabase) -> Result<f64> {
        db.get("rho", Some(0))
    }

    fn residual_with_cell_density(
        &self,
        solution: &DVector<f64>,
        db: &MaterialDatabase,
        _cell: usize,
        density: f64,
    ) -> Result<DVector<f64>> {
        self.evaluate_residual(solution, &db.with_value("rho", Some(0), density)?)
    }
}

pub fn database() -> MaterialDatabase {
    MaterialDatabase::new(vec![Phase::new(0)
        .with_name("mantle")
        .with("eta", 2.0)
        .with("rho", 3.0)])
    .with_global("alpha", 0.5)
}

/// Velocity at the cell center, gradients of `rho`, `eta` and `alpha`.
pub fn config() -> InversionConfig {
    InversionConfig {
        parameters: vec![
            ParameterBlock::new("rho", Some(0)),
            ParameterBlock::new("eta", Some(0)),
            ParameterBlock::new("alpha", None),
        ],
        observations: vec![ObservationBlock::new(
            [0.5, 0.5, 0.5],
            VelocityComponent::Z,
            None,
        )],
        ..InversionConfig::default()
    }
}

/// A file in the temporary directory that is removed on drop.
pub struct TempPath(pub std::path::PathBuf);

impl TempPath {
    pub fn new(name: &str) -> Self {
        Self(std::env::temp_dir().join(format!(
            "adjoint-inversion-{}-{}",
            std::process::id(),
            name
        )))
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
