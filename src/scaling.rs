//! Nondimensionalization and the per-parameter lookup table.
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Characteristic scales used to convert between physical and solver units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scaling {
    pub length: f64,
    pub velocity: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            length: 1.0,
            velocity: 1.0,
        }
    }
}

impl Scaling {
    pub fn new(length: f64, velocity: f64) -> Self {
        Self { length, velocity }
    }

    pub fn length_to_solver(&self, value: f64) -> f64 {
        value / self.length
    }

    pub fn length_to_physical(&self, value: f64) -> f64 {
        value * self.length
    }

    pub fn velocity_to_solver(&self, value: f64) -> f64 {
        value / self.velocity
    }

    pub fn velocity_to_physical(&self, value: f64) -> f64 {
        value * self.velocity
    }
}

/// How the derivative of the objective with respect to a parameter is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradientMethod {
    /// Shared adjoint solve plus a one-sided difference of the residual.
    Adjoint,
    /// Full forward solve at the perturbed value.
    FiniteDifference,
}

impl GradientMethod {
    pub fn label(self) -> &'static str {
        match self {
            GradientMethod::Adjoint => "adjoint",
            GradientMethod::FiniteDifference => "FD",
        }
    }
}

/// Static properties of a named material parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterTraits {
    pub method: GradientMethod,
    /// Reported relative to the reference density in the scaling law.
    pub density_like: bool,
}

const ADJOINT: ParameterTraits = ParameterTraits {
    method: GradientMethod::Adjoint,
    density_like: false,
};

const DENSITY: ParameterTraits = ParameterTraits {
    method: GradientMethod::Adjoint,
    density_like: true,
};

const FINITE_DIFFERENCE: ParameterTraits = ParameterTraits {
    method: GradientMethod::FiniteDifference,
    density_like: false,
};

const TABLE: &[(&str, ParameterTraits)] = &[
    ("rho", DENSITY),
    ("rho_c", DENSITY),
    ("beta", ADJOINT),
    ("eta", ADJOINT),
    ("eta0", ADJOINT),
    ("e0", ADJOINT),
    ("Bd", ADJOINT),
    ("Vd", ADJOINT),
    ("Ed", ADJOINT),
    ("n", ADJOINT),
    ("Bn", ADJOINT),
    ("Vn", ADJOINT),
    ("En", ADJOINT),
    ("Bp", ADJOINT),
    ("Ep", ADJOINT),
    ("Vp", ADJOINT),
    ("taup", ADJOINT),
    ("gamma", ADJOINT),
    ("q", ADJOINT),
    ("Bdc", ADJOINT),
    ("mu", ADJOINT),
    ("Bps", ADJOINT),
    ("d", ADJOINT),
    ("G", ADJOINT),
    ("Kb", ADJOINT),
    ("nu", ADJOINT),
    ("ch", FINITE_DIFFERENCE),
    ("fr", FINITE_DIFFERENCE),
    ("eta_st", FINITE_DIFFERENCE),
    ("alpha", FINITE_DIFFERENCE),
    ("Cp", FINITE_DIFFERENCE),
    ("k", FINITE_DIFFERENCE),
    ("A", FINITE_DIFFERENCE),
];

/// Look up how a parameter is differentiated.
///
/// Unknown names fall back to finite differences with a warning.
pub fn parameter_traits(name: &str) -> ParameterTraits {
    match TABLE.iter().find(|(key, _)| *key == name) {
        Some((_, traits)) => *traits,
        None => {
            warn!(
                parameter = name,
                "no adjoint residual derivative known, falling back to finite differences"
            );
            FINITE_DIFFERENCE
        }
    }
}
