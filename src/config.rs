//! Run configuration, read from JSON.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{InversionError, Result};
use crate::krylov::GmresConfig;
use crate::objective::{CostScaling, GradientMode};
use crate::observation::{ObservationMode, VelocityComponent};
use crate::scaling::Scaling;

/// Upper bound on the number of (expanded) inversion parameters.
pub const MAX_PARAMETERS: usize = 50;
/// Upper bound on the number of observation points.
pub const MAX_OBSERVATIONS: usize = 100;

/// Keyword that expands to every material property of a phase.
pub const ALL_MATERIAL_PARAMETERS: &str = "AllMaterialParameters";

/// What a run does with the gradient machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    /// One objective and gradient evaluation, optionally followed by a scaling law.
    #[default]
    AdjointGradients,
    /// Built-in steepest descent with backtracking.
    GradientDescent,
    /// Limited-memory quasi-Newton, projected onto bounds when any are given.
    QuasiNewton,
    /// Forward solve whose result is stored as the comparison field of later runs.
    SyntheticForwardRun,
}

/// One inversion parameter as written in the input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBlock {
    pub name: String,
    /// Phase index; `None` addresses a global parameter.
    #[serde(default)]
    pub phase: Option<usize>,
    /// Starting value. Taken from the material database when absent.
    #[serde(default)]
    pub initial_guess: Option<f64>,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    /// Invert for `log10` of the value.
    #[serde(default)]
    pub log10: bool,
    /// Force (`true`) or forbid (`false`) a finite-difference gradient.
    /// Chosen from the parameter name when absent.
    #[serde(default)]
    pub fd_gradient: Option<bool>,
    /// Relative step of the finite-difference gradient for this parameter.
    #[serde(default)]
    pub fd_epsilon: Option<f64>,
}

impl ParameterBlock {
    pub fn new(name: &str, phase: Option<usize>) -> Self {
        Self {
            name: name.to_owned(),
            phase,
            initial_guess: None,
            lower_bound: None,
            upper_bound: None,
            log10: false,
            fd_gradient: None,
            fd_epsilon: None,
        }
    }

    pub fn with_initial_guess(self, value: f64) -> Self {
        Self {
            initial_guess: Some(value),
            ..self
        }
    }

    pub fn with_bounds(self, lower: f64, upper: f64) -> Self {
        Self {
            lower_bound: Some(lower),
            upper_bound: Some(upper),
            ..self
        }
    }

    pub fn with_log10(self) -> Self {
        Self { log10: true, ..self }
    }

    pub fn with_fd_gradient(self, fd_epsilon: Option<f64>) -> Self {
        Self {
            fd_gradient: Some(true),
            fd_epsilon,
            ..self
        }
    }
}

/// One observation point, in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBlock {
    pub coordinates: [f64; 3],
    pub component: VelocityComponent,
    /// Target velocity. Required when the cost function is minimized.
    #[serde(default)]
    pub value: Option<f64>,
}

impl ObservationBlock {
    pub fn new(coordinates: [f64; 3], component: VelocityComponent, value: Option<f64>) -> Self {
        Self {
            coordinates,
            component,
            value,
        }
    }
}

/// Complete description of an inversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InversionConfig {
    pub mode: RunMode,
    pub gradient_mode: GradientMode,
    pub cost_scaling: CostScaling,
    pub observation_mode: ObservationMode,
    /// Components observed in whole-domain and free-surface modes.
    pub components: Vec<VelocityComponent>,
    /// Replace scalar parameter gradients by a per-cell density gradient.
    pub field_sensitivity: bool,
    /// March observation points with the flow once per timestep.
    pub advect_points: bool,
    /// Take the comparison field from observation targets rather than from a
    /// previously saved synthetic forward run.
    pub use_observation_targets: bool,
    pub comparison_file: Option<PathBuf>,

    pub tolerance: f64,
    pub line_search_growth: f64,
    pub line_search_shrink: f64,
    pub max_step_factor: f64,
    pub initial_step_scale: f64,
    pub max_iterations: usize,
    pub max_line_search_iterations: usize,

    pub compute_scaling_law: bool,
    pub reference_density: f64,
    pub scaling_law_file: PathBuf,

    /// Default relative step of finite-difference gradients.
    pub fd_epsilon: f64,
    /// Relative step of the residual derivative in adjoint gradients.
    pub adjoint_epsilon: f64,
    pub adjoint_solver: GmresConfig,

    pub scaling: Scaling,
    pub parameters: Vec<ParameterBlock>,
    pub observations: Vec<ObservationBlock>,
}

impl Default for InversionConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::AdjointGradients,
            gradient_mode: GradientMode::Solution,
            cost_scaling: CostScaling::None,
            observation_mode: ObservationMode::Points,
            components: vec![VelocityComponent::Z],
            field_sensitivity: false,
            advect_points: false,
            use_observation_targets: true,
            comparison_file: None,
            tolerance: 1e-10,
            line_search_growth: 2.0,
            line_search_shrink: 0.5,
            max_step_factor: 100.0,
            initial_step_scale: 0.1,
            max_iterations: 50,
            max_line_search_iterations: 20,
            compute_scaling_law: false,
            reference_density: 0.0,
            scaling_law_file: PathBuf::from("ScalingLaw.dat"),
            fd_epsilon: 1e-6,
            adjoint_epsilon: 1e-6,
            adjoint_solver: GmresConfig::default(),
            scaling: Scaling::default(),
            parameters: Vec::new(),
            observations: Vec::new(),
        }
    }
}

impl InversionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&contents)?;
        info!(
            path = %path.as_ref().display(),
            parameters = config.parameters.len(),
            observations = config.observations.len(),
            mode = ?config.mode,
            "loaded inversion configuration"
        );
        Ok(config)
    }

    /// Check every rule that does not need the material database.
    ///
    /// Runs before any forward solve; expansion of
    /// [`ALL_MATERIAL_PARAMETERS`] is re-checked against [`MAX_PARAMETERS`]
    /// when the registry is built.
    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(InversionError::Config(
                "no inversion parameter blocks given".into(),
            ));
        }
        if self.parameters.len() > MAX_PARAMETERS {
            return Err(InversionError::TooManyParameters {
                found: self.parameters.len(),
                max: MAX_PARAMETERS,
            });
        }
        if self.observations.len() > MAX_OBSERVATIONS {
            return Err(InversionError::TooManyObservations {
                found: self.observations.len(),
                max: MAX_OBSERVATIONS,
            });
        }
        if self.observation_mode == ObservationMode::Points && self.observations.is_empty() {
            return Err(InversionError::Config(
                "point observations requested but no observation blocks given".into(),
            ));
        }
        if self.observation_mode != ObservationMode::Points && self.components.is_empty() {
            return Err(InversionError::Config(
                "no velocity component selected for the observed field".into(),
            ));
        }
        if self.gradient_mode == GradientMode::CostFunction
            && self.use_observation_targets
            && self.observation_mode == ObservationMode::Points
        {
            if let Some(i) = self.observations.iter().position(|o| o.value.is_none()) {
                return Err(InversionError::Config(format!(
                    "observation {i} has no target value, which the cost function needs"
                )));
            }
        }
        if self.gradient_mode == GradientMode::CostFunction
            && self.use_observation_targets
            && self.observation_mode != ObservationMode::Points
        {
            return Err(InversionError::Config(
                "field misfits compare against a saved solution, set use_observation_targets to false".into(),
            ));
        }
        if !self.use_observation_targets
            && self.comparison_file.is_none()
            && self.mode != RunMode::SyntheticForwardRun
        {
            return Err(InversionError::Config(
                "comparison_file is required when observation targets are not used".into(),
            ));
        }
        if self.compute_scaling_law && self.gradient_mode != GradientMode::Solution {
            return Err(InversionError::Config(
                "scaling laws need gradients with respect to the solution".into(),
            ));
        }
        if self.field_sensitivity {
            if self.parameters.len() != 1 {
                return Err(InversionError::FieldSensitivityTooManyParameters(
                    self.parameters.len(),
                ));
            }
            if self.parameters[0].name != "rho" {
                return Err(InversionError::UnsupportedFieldSensitivity(
                    self.parameters[0].name.clone(),
                ));
            }
            if self.mode != RunMode::AdjointGradients {
                return Err(InversionError::Config(
                    "field sensitivity is only available for single gradient evaluations".into(),
                ));
            }
        }
        if !(self.line_search_shrink > 0.0 && self.line_search_shrink < 1.0) {
            return Err(InversionError::Config(format!(
                "line_search_shrink must lie in (0, 1), got {}",
                self.line_search_shrink
            )));
        }
        if self.line_search_growth < 1.0 {
            return Err(InversionError::Config(format!(
                "line_search_growth must be >= 1, got {}",
                self.line_search_growth
            )));
        }
        if !(self.max_step_factor > 0.0 && self.initial_step_scale > 0.0 && self.tolerance >= 0.0) {
            return Err(InversionError::Config(
                "descent step settings must be positive and the tolerance non-negative".into(),
            ));
        }
        for block in &self.parameters {
            if let Some(epsilon) = block.fd_epsilon {
                if !(epsilon.is_finite() && epsilon >= 0.0) {
                    return Err(InversionError::Config(format!(
                        "fd_epsilon of {}[{:?}] must be finite and non-negative, got {epsilon}",
                        block.name, block.phase
                    )));
                }
            }
        }
        if self.fd_epsilon <= 0.0 || self.adjoint_epsilon <= 0.0 {
            return Err(InversionError::Config(
                "finite-difference steps must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn has_bounds(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| p.lower_bound.is_some() || p.upper_bound.is_some())
    }
}
