//! Restarted GMRES(m) for the adjoint system.
//!
//! The Krylov basis is built by Arnoldi iteration with modified
//! Gram-Schmidt, and the projected least-squares problem is reduced with
//! Givens rotations on the upper Hessenberg matrix. When the basis reaches
//! `restart` vectors without convergence the solver restarts from the
//! current iterate.
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Anything that can be applied to a vector.
pub trait LinearOperator {
    fn dim(&self) -> usize;

    /// `out = A x`.
    fn apply(&self, x: &DVector<f64>, out: &mut DVector<f64>);
}

impl LinearOperator for DMatrix<f64> {
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, x: &DVector<f64>, out: &mut DVector<f64>) {
        self.mul_to(x, out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmresConfig {
    /// Krylov subspace dimension before restart.
    pub restart: usize,
    /// Maximum number of restart cycles.
    pub max_iterations: usize,
    /// Tolerance on the residual norm relative to the right-hand side.
    pub tolerance: f64,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            restart: 30,
            max_iterations: 100,
            tolerance: 1e-10,
        }
    }
}

/// Result of a Krylov solve. The solution is the best iterate found, even
/// when `converged` is false.
#[derive(Debug, Clone, PartialEq)]
pub struct KrylovOutcome {
    pub solution: DVector<f64>,
    /// Matrix-vector products summed over all restarts.
    pub iterations: usize,
    /// Final residual norm `||b - A x||`.
    pub residual: f64,
    pub converged: bool,
}

/// A Givens rotation `(c, s)` zeroing the second entry of `(a, b)`.
#[derive(Clone, Copy)]
struct GivensRotation {
    c: f64,
    s: f64,
}

impl GivensRotation {
    fn compute(a: f64, b: f64) -> Self {
        if b == 0.0 {
            Self { c: 1.0, s: 0.0 }
        } else {
            let r = a.hypot(b);
            Self { c: a / r, s: b / r }
        }
    }

    #[inline]
    fn apply(&self, a: &mut f64, b: &mut f64) {
        let (ta, tb) = (*a, *b);
        *a = self.c * ta + self.s * tb;
        *b = -self.s * ta + self.c * tb;
    }
}

/// Solve `A x = b` starting from zero.
pub fn gmres(op: &impl LinearOperator, b: &DVector<f64>, config: &GmresConfig) -> KrylovOutcome {
    let n = op.dim();
    let mut x = DVector::zeros(n);
    let b_norm = b.norm();
    if n == 0 || b_norm == 0.0 {
        return KrylovOutcome {
            solution: x,
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }
    let abs_tol = config.tolerance * b_norm;
    let m = config.restart.clamp(1, n);
    let mut av = DVector::zeros(n);
    let mut total_iters = 0;

    for _ in 0..config.max_iterations {
        op.apply(&x, &mut av);
        let r = b - &av;
        let beta = r.norm();
        if beta <= abs_tol {
            return KrylovOutcome {
                solution: x,
                iterations: total_iters,
                residual: beta,
                converged: true,
            };
        }

        let mut basis: Vec<DVector<f64>> = Vec::with_capacity(m + 1);
        basis.push(r / beta);
        let mut h = DMatrix::<f64>::zeros(m + 1, m);
        let mut givens: Vec<GivensRotation> = Vec::with_capacity(m);
        let mut g = DVector::<f64>::zeros(m + 1);
        g[0] = beta;
        let mut k = 0;

        for j in 0..m {
            total_iters += 1;
            let mut w = DVector::zeros(n);
            op.apply(&basis[j], &mut w);
            for (i, v) in basis.iter().enumerate() {
                let hij = w.dot(v);
                h[(i, j)] = hij;
                w.axpy(-hij, v, 1.0);
            }
            let h_next = w.norm();
            h[(j + 1, j)] = h_next;

            for (i, rot) in givens.iter().enumerate() {
                let (mut a, mut c) = (h[(i, j)], h[(i + 1, j)]);
                rot.apply(&mut a, &mut c);
                h[(i, j)] = a;
                h[(i + 1, j)] = c;
            }
            let rot = GivensRotation::compute(h[(j, j)], h[(j + 1, j)]);
            let (mut a, mut c) = (h[(j, j)], h[(j + 1, j)]);
            rot.apply(&mut a, &mut c);
            h[(j, j)] = a;
            h[(j + 1, j)] = 0.0;
            let (mut gj, mut gj1) = (g[j], g[j + 1]);
            rot.apply(&mut gj, &mut gj1);
            g[j] = gj;
            g[j + 1] = gj1;
            givens.push(rot);
            k = j + 1;

            if gj1.abs() <= abs_tol || h_next == 0.0 {
                break;
            }
            basis.push(w / h_next);
        }

        // back substitution on the triangular part of H
        let mut y = DVector::<f64>::zeros(k);
        for i in (0..k).rev() {
            let mut sum = g[i];
            for l in i + 1..k {
                sum -= h[(i, l)] * y[l];
            }
            y[i] = if h[(i, i)] != 0.0 { sum / h[(i, i)] } else { 0.0 };
        }
        for (i, yi) in y.iter().enumerate() {
            x.axpy(*yi, &basis[i], 1.0);
        }
    }

    op.apply(&x, &mut av);
    let residual = (b - &av).norm();
    KrylovOutcome {
        solution: x,
        iterations: total_iters,
        residual,
        converged: residual <= abs_tol,
    }
}
