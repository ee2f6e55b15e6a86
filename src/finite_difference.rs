//! One-sided finite-difference gradients for parameters the adjoint cannot reach.
//!
//! Every parameter flagged [`GradientMethod::FiniteDifference`] costs one full
//! forward solve at
//! ```math
//! p_i + \delta_i,\qquad \delta_i = \varepsilon_i\,p_i,
//! ```
//! on top of a single reference solve at the unperturbed parameters that all
//! of them share, and the derivative is the forward quotient
//! ```math
//! \frac{\partial F}{\partial p_i} \approx \frac{F(p_i + \delta_i) - F(p_i)}{\delta_i}.
//! ```
use nalgebra::DVector;
use tracing::debug;

use crate::error::{InversionError, Result};
use crate::material::MaterialDatabase;
use crate::parameters::ParameterRegistry;
use crate::scaling::GradientMethod;

/// Fill the finite-difference entries of `gradient`.
///
/// `objective` runs a full forward solve with the values in the database it
/// is handed and returns `$F$`. The database is perturbed in place for the
/// duration of each call and restored afterwards, also when `objective`
/// fails. Returns the reference objective, or `None` when no parameter uses
/// finite differences (then `objective` is never called).
///
/// # Errors
///
/// A parameter whose current value is exactly zero cannot be perturbed
/// relative to itself and is rejected before any solve runs.
pub fn fd_gradients(
    registry: &ParameterRegistry,
    db: &mut MaterialDatabase,
    default_epsilon: f64,
    gradient: &mut DVector<f64>,
    mut objective: impl FnMut(&MaterialDatabase) -> Result<f64>,
) -> Result<Option<f64>> {
    let indices = registry.indices(GradientMethod::FiniteDifference);
    if indices.is_empty() {
        return Ok(None);
    }
    if gradient.len() != registry.len() {
        return Err(InversionError::DimensionMismatch {
            expected: registry.len(),
            found: gradient.len(),
        });
    }
    for &i in &indices {
        let p = registry.get(i).ok_or(InversionError::DimensionMismatch {
            expected: registry.len(),
            found: i,
        })?;
        if p.value == 0.0 {
            return Err(InversionError::ZeroParameterValue {
                name: p.id.name.clone(),
                phase: p.id.phase,
            });
        }
    }

    let reference = objective(db)?;
    debug!(objective = reference, "finite-difference reference solve");

    for i in indices {
        let Some(p) = registry.get(i) else { continue };
        // a zero step falls back to the default
        let epsilon = p.fd_epsilon.filter(|e| *e != 0.0).unwrap_or(default_epsilon);
        let perturbation = p.value * epsilon;
        let perturbed = {
            let guard = db.override_value(&p.id.name, p.id.phase, p.physical(p.value + perturbation))?;
            objective(&*guard)?
        };
        gradient[i] = (perturbed - reference) / perturbation;
        debug!(
            parameter = %p.id,
            perturbation,
            objective = perturbed,
            gradient = gradient[i],
            "finite-difference gradient"
        );
    }
    Ok(Some(reference))
}
