use nalgebra::{DVector, RealField};
use num_traits::Float;

use crate::ObjectiveProblem;

mod derivative;
pub use derivative::derivative;

/// Compute a [numerical approximation](https://en.wikipedia.org/wiki/Numerical_differentiation)
/// of the gradient of an [`ObjectiveProblem`] for testing.
///
/// Each entry costs a few dozen evaluations of the full problem, so this is
/// meant for checking adjoint or finite-difference gradients on small
/// problems, never for driving an optimization. The achieved precision is
/// well below the floating point precision and depends on how smooth the
/// objective is around `x`.
///
/// Returns `None` if any evaluation fails.
///
/// # Example
///
/// ```
/// use adjoint_inversion::{differentiate_numerically, ObjectiveProblem, Result};
/// use approx::assert_relative_eq;
/// use nalgebra::DVector;
///
/// struct Paraboloid;
///
/// impl ObjectiveProblem<f64> for Paraboloid {
///     fn evaluate(&mut self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
///         Ok((x.norm_squared(), x * 2.0))
///     }
/// }
///
/// let x = DVector::from_vec(vec![1.0, -2.0]);
/// let numeric = differentiate_numerically(&x, &mut Paraboloid).unwrap();
/// let (_, analytic) = Paraboloid.evaluate(&x).unwrap();
/// assert_relative_eq!(numeric, analytic, epsilon = 1e-8);
/// ```
pub fn differentiate_numerically<F, O>(x: &DVector<F>, problem: &mut O) -> Option<DVector<F>>
where
    F: RealField + Float,
    O: ObjectiveProblem<F>,
{
    let mut gradient = DVector::zeros(x.len());
    let mut probe = x.clone();
    for i in 0..x.len() {
        gradient[i] = derivative(x[i], |xi| {
            probe[i] = xi;
            problem.evaluate(&probe).ok().map(|(f, _)| f)
        })?;
        probe[i] = x[i];
    }
    Some(gradient)
}
