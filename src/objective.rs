//! Scalar mismatch between the projected solution and the comparison field.
//!
//! Two modes are available. With [`GradientMode::Solution`] the functional
//! is the projected solution itself,
//! ```math
//! F = v_s\,\vec{P}\cdot\vec{x},\qquad \frac{\partial F}{\partial\vec{x}} = \vec{P},
//! ```
//! and with [`GradientMode::CostFunction`] it is the weighted least-squares
//! misfit
//! ```math
//! F = \frac{v_s^2}{2s}\sum_i |P_i|\,(x_i - x^{\text{ini}}_i)^2,\qquad
//! \frac{\partial F}{\partial x_i} = \frac{P_i\,(x_i - x^{\text{ini}}_i)}{s},
//! ```
//! where `$v_s$` is the velocity scale and `$s$` the [`CostScaling`] factor.
//! The derivative stays in solver units; only `$F$` is dimensional.
use core::convert::TryFrom;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::error::{InversionError, Result};
use crate::scaling::Scaling;

/// Quantity that gradients are taken of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GradientMode {
    /// Gradient of the projected solution.
    #[default]
    Solution,
    /// Gradient of the least-squares cost function.
    CostFunction,
}

impl TryFrom<String> for GradientMode {
    type Error = InversionError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "Solution" => Ok(GradientMode::Solution),
            "CostFunction" => Ok(GradientMode::CostFunction),
            _ => Err(InversionError::UnknownGradientMode(value)),
        }
    }
}

impl From<GradientMode> for String {
    fn from(mode: GradientMode) -> Self {
        match mode {
            GradientMode::Solution => "Solution".into(),
            GradientMode::CostFunction => "CostFunction".into(),
        }
    }
}

impl GradientMode {
    /// Physical factor applied to gradients in this mode.
    pub fn gradient_scale(self, scaling: &Scaling) -> f64 {
        match self {
            GradientMode::Solution => scaling.velocity,
            GradientMode::CostFunction => scaling.velocity * scaling.velocity,
        }
    }
}

/// Normalization of the cost function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CostScaling {
    #[default]
    None,
    /// Divide by the magnitude of the mean target.
    Mean,
    /// Divide by the target variance.
    Variance,
}

impl TryFrom<String> for CostScaling {
    type Error = InversionError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "None" => Ok(CostScaling::None),
            "Mean" => Ok(CostScaling::Mean),
            "Var" => Ok(CostScaling::Variance),
            _ => Err(InversionError::UnknownCostScaling(value)),
        }
    }
}

impl From<CostScaling> for String {
    fn from(scaling: CostScaling) -> Self {
        match scaling {
            CostScaling::None => "None".into(),
            CostScaling::Mean => "Mean".into(),
            CostScaling::Variance => "Var".into(),
        }
    }
}

impl CostScaling {
    /// Normalization factor from the finite targets of all ranks.
    ///
    /// The variance keeps only the squared deviation of the last target,
    /// divided by `n - 1`. Returns `1` when no normalization applies.
    pub fn factor(self, targets: &[f64], comm: &impl Communicator) -> f64 {
        let finite: Vec<f64> = targets.iter().copied().filter(|t| t.is_finite()).collect();
        let count = comm.sum(finite.len() as f64);
        let total = comm.sum(finite.iter().sum());
        match self {
            CostScaling::None => 1.0,
            _ if count == 0.0 => 1.0,
            CostScaling::Mean => (total / count).abs(),
            CostScaling::Variance => {
                if count < 2.0 {
                    return 1.0;
                }
                let mean = (total / count).abs();
                let mut deviation = 0.0;
                for target in &finite {
                    deviation = (target - mean) * (target - mean);
                }
                // last deviation of the highest rank that holds targets
                let last = comm.from_last_holder(deviation, !finite.is_empty());
                last / (count - 1.0)
            }
        }
    }
}

/// Objective value and its derivative with respect to the solution.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveState {
    pub value: f64,
    pub derivative: DVector<f64>,
    pub scale: f64,
}

/// Objective and `dF/dx` for one solution.
///
/// `projection` and `comparison` share the layout of `solution`.
pub fn evaluate(
    mode: GradientMode,
    solution: &DVector<f64>,
    projection: &DVector<f64>,
    comparison: &DVector<f64>,
    cost_scale: f64,
    scaling: &Scaling,
    comm: &impl Communicator,
) -> Result<ObjectiveState> {
    for len in [projection.len(), comparison.len()] {
        if len != solution.len() {
            return Err(InversionError::DimensionMismatch {
                expected: solution.len(),
                found: len,
            });
        }
    }
    let velocity = scaling.velocity;
    match mode {
        GradientMode::Solution => {
            let value = comm.sum(projection.dot(solution)) * velocity;
            Ok(ObjectiveState {
                value,
                derivative: projection.clone(),
                scale: 1.0,
            })
        }
        GradientMode::CostFunction => {
            let misfit = solution - comparison;
            let derivative = projection.component_mul(&misfit) / cost_scale;
            let local = projection
                .iter()
                .zip(misfit.iter())
                .map(|(p, m)| p.abs() * m * m)
                .sum::<f64>();
            let value = 0.5 * comm.sum(local) / cost_scale * velocity * velocity;
            Ok(ObjectiveState {
                value,
                derivative,
                scale: cost_scale,
            })
        }
    }
}
