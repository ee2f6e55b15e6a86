//! The set of parameters being inverted for.
use core::fmt;

use nalgebra::DVector;
use tracing::info;

use crate::config::{InversionConfig, ParameterBlock, ALL_MATERIAL_PARAMETERS, MAX_PARAMETERS};
use crate::error::{InversionError, Result};
use crate::material::MaterialDatabase;
use crate::scaling::{parameter_traits, GradientMethod};

/// Properties that never take part when a whole phase is expanded.
const NOT_INVERTIBLE: &[&str] = &["visID", "rho_ph", "rho_ph_dir", "Name"];

/// Creep-law profiles and the parameters they stand for.
const PROFILES: &[(&str, &[&str])] = &[
    ("disl_prof", &["Bn", "n", "En", "Vn"]),
    ("diff_prof", &["Bd", "Ed", "Vd"]),
    ("peir_prof", &["Bp", "Ep", "Vp", "taup", "gamma", "q"]),
];

/// Name and phase of a material parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterId {
    pub name: String,
    /// `None` for global parameters.
    pub phase: Option<usize>,
}

impl ParameterId {
    pub fn new(name: &str, phase: Option<usize>) -> Self {
        Self {
            name: name.to_owned(),
            phase,
        }
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Some(phase) => write!(f, "{}[{}]", self.name, phase),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub id: ParameterId,
    /// Current value of the optimization variable (the exponent for `log10`
    /// parameters).
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub log10: bool,
    pub fd_epsilon: Option<f64>,
    pub method: GradientMethod,
    pub density_like: bool,
}

impl Parameter {
    fn from_block(block: &ParameterBlock, name: &str, db: &MaterialDatabase) -> Result<Self> {
        let value = match block.initial_guess {
            Some(v) => v,
            None => {
                let stored = db.get(name, block.phase)?;
                if block.log10 {
                    stored.log10()
                } else {
                    stored
                }
            }
        };
        let traits = parameter_traits(name);
        let method = match block.fd_gradient {
            Some(true) => GradientMethod::FiniteDifference,
            Some(false) => GradientMethod::Adjoint,
            None => traits.method,
        };
        // a single given bound pins the other side to the starting value
        let (lower, upper) = match (block.lower_bound, block.upper_bound) {
            (None, None) => (f64::NEG_INFINITY, f64::INFINITY),
            (lower, upper) => (lower.unwrap_or(value), upper.unwrap_or(value)),
        };
        Ok(Self {
            id: ParameterId::new(name, block.phase),
            value,
            lower,
            upper,
            log10: block.log10,
            fd_epsilon: block.fd_epsilon,
            method,
            density_like: traits.density_like,
        })
    }

    /// Value handed to the material database for optimization variable `p`.
    pub fn physical(&self, p: f64) -> f64 {
        if self.log10 {
            10f64.powf(p)
        } else {
            p
        }
    }

    pub fn physical_value(&self) -> f64 {
        self.physical(self.value)
    }
}

/// Parameters of one run, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRegistry {
    parameters: Vec<Parameter>,
    bounded: bool,
}

impl ParameterRegistry {
    /// Expand the parameter blocks of `config` against the material database.
    pub fn from_config(config: &InversionConfig, db: &MaterialDatabase) -> Result<Self> {
        let mut parameters = Vec::new();
        for block in &config.parameters {
            if block.name == ALL_MATERIAL_PARAMETERS {
                let phase = block.phase.ok_or_else(|| {
                    InversionError::Config(format!("{ALL_MATERIAL_PARAMETERS} needs a phase"))
                })?;
                for name in db.parameter_names(phase) {
                    if NOT_INVERTIBLE.contains(&name) {
                        continue;
                    }
                    let expanded = ParameterBlock::new(name, Some(phase));
                    parameters.push(Parameter::from_block(&expanded, name, db)?);
                }
            } else if let Some((_, names)) = PROFILES.iter().find(|(key, _)| *key == block.name) {
                for name in names.iter() {
                    let expanded = ParameterBlock::new(name, block.phase);
                    parameters.push(Parameter::from_block(&expanded, name, db)?);
                }
            } else {
                parameters.push(Parameter::from_block(block, &block.name, db)?);
            }
        }
        if parameters.len() > MAX_PARAMETERS {
            return Err(InversionError::TooManyParameters {
                found: parameters.len(),
                max: MAX_PARAMETERS,
            });
        }
        for p in &parameters {
            info!(
                parameter = %p.id,
                value = p.value,
                log10 = p.log10,
                method = p.method.label(),
                "inversion parameter"
            );
        }
        Ok(Self {
            parameters,
            bounded: config.has_bounds(),
        })
    }

    pub fn new(parameters: Vec<Parameter>, bounded: bool) -> Self {
        Self {
            parameters,
            bounded,
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.parameters.get(index)
    }

    /// Whether any parameter declared a bound.
    pub fn has_bounds(&self) -> bool {
        self.bounded
    }

    pub fn values(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.parameters.iter().map(|p| p.value))
    }

    pub fn set_values(&mut self, values: &DVector<f64>) -> Result<()> {
        if values.len() != self.len() {
            return Err(InversionError::DimensionMismatch {
                expected: self.len(),
                found: values.len(),
            });
        }
        for (p, v) in self.parameters.iter_mut().zip(values.iter()) {
            p.value = *v;
        }
        Ok(())
    }

    pub fn lower_bounds(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.parameters.iter().map(|p| p.lower))
    }

    pub fn upper_bounds(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.parameters.iter().map(|p| p.upper))
    }

    /// Indices of the parameters differentiated by `method`.
    pub fn indices(&self, method: GradientMethod) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.method == method)
            .map(|(i, _)| i)
            .collect()
    }

    /// Write the current physical values into `db`.
    pub fn apply(&self, db: &mut MaterialDatabase) -> Result<()> {
        for p in &self.parameters {
            db.set(&p.id.name, p.id.phase, p.physical_value())?;
        }
        Ok(())
    }
}
