//! Per-phase material properties handed to the forward solver.
use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::{InversionError, Result};

/// A material region and its named properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
}

impl Phase {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            name: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.properties.insert(key.to_owned(), value);
        self
    }
}

/// Material parameters of every phase plus global (phase independent) values.
///
/// This is the explicit channel through which parameter values reach the
/// forward solver. Scoped changes go through [`MaterialDatabase::override_value`]
/// or [`MaterialDatabase::with_value`], both of which leave `self` untouched once
/// they are done.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialDatabase {
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub globals: BTreeMap<String, f64>,
}

impl MaterialDatabase {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self {
            phases,
            globals: BTreeMap::new(),
        }
    }

    pub fn with_global(mut self, key: &str, value: f64) -> Self {
        self.globals.insert(key.to_owned(), value);
        self
    }

    fn phase(&self, id: usize) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    fn slot(&mut self, name: &str, phase: Option<usize>) -> Result<&mut f64> {
        let map = match phase {
            Some(id) => self
                .phases
                .iter_mut()
                .find(|p| p.id == id)
                .map(|p| &mut p.properties),
            None => Some(&mut self.globals),
        };
        map.and_then(|m| m.get_mut(name))
            .ok_or_else(|| InversionError::UnknownParameter {
                name: name.to_owned(),
                phase,
            })
    }

    /// Value of `name` in `phase`, or the global value when `phase` is `None`.
    pub fn get(&self, name: &str, phase: Option<usize>) -> Result<f64> {
        let value = match phase {
            Some(id) => self.phase(id).and_then(|p| p.properties.get(name)),
            None => self.globals.get(name),
        };
        value.copied().ok_or_else(|| InversionError::UnknownParameter {
            name: name.to_owned(),
            phase,
        })
    }

    /// Overwrite an existing value. Unknown keys are an error, never inserted.
    pub fn set(&mut self, name: &str, phase: Option<usize>, value: f64) -> Result<()> {
        *self.slot(name, phase)? = value;
        Ok(())
    }

    /// A private copy with `name` replaced by `value`.
    pub fn with_value(&self, name: &str, phase: Option<usize>, value: f64) -> Result<Self> {
        let mut copy = self.clone();
        copy.set(name, phase, value)?;
        Ok(copy)
    }

    /// Temporarily replace a value; the previous value is restored when the
    /// returned guard is dropped, including on early return.
    pub fn override_value(
        &mut self,
        name: &str,
        phase: Option<usize>,
        value: f64,
    ) -> Result<ParameterOverride<'_>> {
        let slot = self.slot(name, phase)?;
        let previous = core::mem::replace(slot, value);
        Ok(ParameterOverride {
            db: self,
            name: name.to_owned(),
            phase,
            previous,
        })
    }

    pub fn phase_description(&self, phase: usize) -> Option<&str> {
        self.phase(phase).and_then(|p| p.name.as_deref())
    }

    /// Names of every property stored for `phase`.
    pub fn parameter_names(&self, phase: usize) -> Vec<&str> {
        self.phase(phase)
            .map(|p| p.properties.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Scope guard returned by [`MaterialDatabase::override_value`].
pub struct ParameterOverride<'a> {
    db: &'a mut MaterialDatabase,
    name: String,
    phase: Option<usize>,
    previous: f64,
}

impl ParameterOverride<'_> {
    pub fn previous(&self) -> f64 {
        self.previous
    }
}

impl Deref for ParameterOverride<'_> {
    type Target = MaterialDatabase;

    fn deref(&self) -> &MaterialDatabase {
        self.db
    }
}

impl Drop for ParameterOverride<'_> {
    fn drop(&mut self) {
        // The slot existed when the guard was created and keys are never removed.
        if let Ok(slot) = self.db.slot(&self.name, self.phase) {
            *slot = self.previous;
        }
    }
}
