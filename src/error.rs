use thiserror::Error;

/// Fatal conditions of an inversion run.
///
/// Recoverable conditions (adjoint solve non-convergence, line-search
/// divergence, iteration cap) are not errors. They are logged and reported
/// through the result structs of the component that detects them.
#[derive(Error, Debug)]
pub enum InversionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Too many inversion parameters: {found} (maximum {max})")]
    TooManyParameters { found: usize, max: usize },

    #[error("Too many observation points: {found} (maximum {max})")]
    TooManyObservations { found: usize, max: usize },

    #[error("Unknown velocity component '{0}' (expected x, y or z)")]
    UnknownVelocityComponent(String),

    #[error("Unknown gradient calculation mode '{0}' (expected Solution or CostFunction)")]
    UnknownGradientMode(String),

    #[error("Unknown cost function scaling '{0}' (expected None, Mean or Var)")]
    UnknownCostScaling(String),

    #[error("Parameter {name}[{phase:?}] is zero and cannot be perturbed multiplicatively")]
    ZeroParameterValue { name: String, phase: Option<usize> },

    #[error("Unknown material parameter {name}[{phase:?}]")]
    UnknownParameter { name: String, phase: Option<usize> },

    #[error("Coordinate {coordinate} lies outside the {axis} axis of the grid")]
    PointOutsideGrid { axis: char, coordinate: f64 },

    #[error("Field sensitivity needs exactly one parameter, {0} were given")]
    FieldSensitivityTooManyParameters(usize),

    #[error("Field sensitivity is only available for density, not '{0}'")]
    UnsupportedFieldSensitivity(String),

    #[error("Forward solver failed: {0}")]
    ForwardSolve(String),

    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<argmin::core::Error> for InversionError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Optimizer(e.to_string())
    }
}

pub type Result<T> = core::result::Result<T, InversionError>;
