//! Power-law fits from a single gradient evaluation.
//!
//! Assuming the observed velocity follows
//! ```math
//! v = A \prod_i p_i^{b_i},
//! ```
//! the exponents follow from the gradient at one point as
//! `$b_i = \frac{\partial v}{\partial p_i}\,\frac{p_i}{v}$`, and the prefactor
//! `$A$` from dividing `$v$` by the product over all positive `$p_i$`.
//! Densities enter relative to a reference density, since it is the density
//! contrast that drives the flow.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::DVector;
use tracing::info;

use crate::error::{InversionError, Result};
use crate::material::MaterialDatabase;
use crate::observation::ObservationPoint;
use crate::parameters::{ParameterId, ParameterRegistry};
use crate::scaling::{GradientMethod, Scaling};

/// Number of terms listed in the log, by decreasing exponent magnitude.
pub const REPORTED_TERMS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingLawTerm {
    pub id: ParameterId,
    /// `$b_i$`; zero when the exponent is not finite.
    pub exponent: f64,
    /// `$p_i$` as used in the fit, relative to the reference density for densities.
    pub value: f64,
    pub log10: bool,
    pub method: GradientMethod,
    pub density_like: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingLaw {
    pub prefactor: f64,
    pub reference_density: f64,
    /// Objective (velocity) the law was fitted to.
    pub objective: f64,
    /// One term per parameter, in registry order.
    pub terms: Vec<ScalingLawTerm>,
}

impl ScalingLaw {
    /// Fit the law to `objective` and its `gradient` at the current values
    /// of `registry`.
    pub fn compute(
        registry: &ParameterRegistry,
        gradient: &DVector<f64>,
        objective: f64,
        reference_density: f64,
    ) -> Result<Self> {
        if gradient.len() != registry.len() {
            return Err(InversionError::DimensionMismatch {
                expected: registry.len(),
                found: gradient.len(),
            });
        }
        let mut prefactor = objective;
        let mut terms = Vec::with_capacity(registry.len());
        for (p, g) in registry.iter().zip(gradient.iter()) {
            let value = if p.density_like {
                p.value - reference_density
            } else {
                p.value
            };
            let exponent = g * value / objective;
            let exponent = if exponent.is_finite() { exponent } else { 0.0 };
            if value > 0.0 {
                prefactor /= value.powf(exponent);
            }
            terms.push(ScalingLawTerm {
                id: p.id.clone(),
                exponent,
                value,
                log10: p.log10,
                method: p.method,
                density_like: p.density_like,
            });
        }
        let law = Self {
            prefactor,
            reference_density,
            objective,
            terms,
        };
        for term in law.ranked() {
            info!(
                parameter = %law.display_name(term),
                phase = ?term.id.phase,
                exponent = term.exponent,
                "scaling law exponent"
            );
        }
        info!(
            prefactor = law.prefactor,
            velocity_check = law.velocity_check(),
            "scaling law"
        );
        Ok(law)
    }

    /// The [`REPORTED_TERMS`] terms with the largest exponent magnitude.
    pub fn ranked(&self) -> Vec<&ScalingLawTerm> {
        let mut ranked: Vec<&ScalingLawTerm> = self.terms.iter().collect();
        ranked.sort_by(|a, b| b.exponent.abs().total_cmp(&a.exponent.abs()));
        ranked.truncate(REPORTED_TERMS);
        ranked
    }

    /// `$A \prod_i p_i^{b_i}$` over the positive `$p_i$`; reproduces the
    /// objective up to rounding.
    pub fn velocity_check(&self) -> f64 {
        self.terms
            .iter()
            .filter(|t| t.value > 0.0)
            .fold(self.prefactor, |v, t| v * t.value.powf(t.exponent))
    }

    /// Name of a term as printed, e.g. `delta(rho)` for densities taken
    /// relative to a non-zero reference density.
    pub fn display_name(&self, term: &ScalingLawTerm) -> String {
        if term.density_like && self.reference_density != 0.0 {
            format!("delta({})", term.id.name)
        } else {
            term.id.name.clone()
        }
    }

    /// Write the plain-text report.
    pub fn write_report(
        &self,
        out: &mut impl Write,
        observations: &[ObservationPoint],
        scaling: &Scaling,
        db: &MaterialDatabase,
    ) -> Result<()> {
        writeln!(out, "# Scaling Law, computed by adjoint-inversion {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(out, "#")?;
        writeln!(out, "#   Vel = A * p[0]^b[0] * p[1]^b[1] * p[2]^b[2] * ...")?;
        writeln!(out, "#")?;
        writeln!(out, "# Prefactor A       : {:.8e}", self.prefactor)?;
        writeln!(out, "# Reference Density : {:.8}", self.reference_density)?;
        writeln!(out, "#")?;
        writeln!(out, "# Observation points:")?;
        writeln!(
            out,
            "#     x              y              z               Component   Measured value"
        )?;
        writeln!(
            out,
            "# --- -------------- -------------- --------------  ----------  ---------------"
        )?;
        for (i, point) in observations.iter().enumerate() {
            let [x, y, z] = point.physical_coordinates(scaling);
            writeln!(
                out,
                "# {:>3} {:<14.5} {:<14.5} {:<14.5}   {:<10}  {:<14.5e}",
                i + 1,
                x,
                y,
                z,
                point.component.label(),
                point.measured(scaling)
            )?;
        }
        writeln!(out, "#")?;
        writeln!(out, "# Scaling law parameters:")?;
        writeln!(
            out,
            "# Parameter             Phase    Exponent b[]       Value p[]          Type     Phase Description"
        )?;
        writeln!(
            out,
            "# --------------------  -------  -----------------  -----------------  -------  --------------------"
        )?;
        for term in &self.terms {
            let phase = term.id.phase.map_or_else(|| "-".to_owned(), |p| p.to_string());
            let description = term
                .id
                .phase
                .and_then(|p| db.phase_description(p))
                .filter(|d| !d.is_empty())
                .unwrap_or("-");
            writeln!(
                out,
                "  {:<5} {:>13}    {:>3}     {:<18.9e} {:<18.9e} {:<7}  {}",
                if term.log10 { "log10" } else { "" },
                self.display_name(term),
                phase,
                term.exponent,
                term.value,
                term.method.label(),
                description
            )?;
        }
        Ok(())
    }

    /// Write the report to `path`, replacing an existing file.
    pub fn write_report_file(
        &self,
        path: impl AsRef<Path>,
        observations: &[ObservationPoint],
        scaling: &Scaling,
        db: &MaterialDatabase,
    ) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        self.write_report(&mut out, observations, scaling, db)?;
        out.flush()?;
        info!(path = %path.as_ref().display(), "scaling law saved");
        Ok(())
    }
}
