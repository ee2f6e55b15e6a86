//! Linear projection of the solution onto the observed quantities.
//!
//! The operator produces a projection vector `$\vec{P}$` with the layout of
//! the solution and a comparison vector `$\vec{x}^{\text{ini}}$` that
//! spreads the observation targets over the same degrees of freedom, so that
//! trilinear interpolation of the comparison at an observation point returns
//! exactly its target.
use core::convert::TryFrom;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::comm::Communicator;
use crate::config::InversionConfig;
use crate::error::{InversionError, Result};
use crate::grid::{FreeSurface, StaggeredGrid, Subdomain};
use crate::scaling::Scaling;

/// Cartesian velocity component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VelocityComponent {
    X,
    Y,
    Z,
}

impl VelocityComponent {
    pub const ALL: [VelocityComponent; 3] =
        [VelocityComponent::X, VelocityComponent::Y, VelocityComponent::Z];

    /// Axis index of the component.
    pub fn dim(self) -> usize {
        match self {
            VelocityComponent::X => 0,
            VelocityComponent::Y => 1,
            VelocityComponent::Z => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VelocityComponent::X => "Vx",
            VelocityComponent::Y => "Vy",
            VelocityComponent::Z => "Vz",
        }
    }
}

impl TryFrom<String> for VelocityComponent {
    type Error = InversionError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "x" | "X" => Ok(VelocityComponent::X),
            "y" | "Y" => Ok(VelocityComponent::Y),
            "z" | "Z" => Ok(VelocityComponent::Z),
            _ => Err(InversionError::UnknownVelocityComponent(value)),
        }
    }
}

impl From<VelocityComponent> for String {
    fn from(component: VelocityComponent) -> Self {
        match component {
            VelocityComponent::X => "x".into(),
            VelocityComponent::Y => "y".into(),
            VelocityComponent::Z => "z".into(),
        }
    }
}

/// Where the objective looks at the solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObservationMode {
    /// Velocity components at individual points.
    #[default]
    Points,
    /// Every degree of freedom of the selected components.
    WholeDomain,
    /// Selected components along the free surface.
    Surface,
}

/// An observation point in solver units.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPoint {
    pub coordinates: [f64; 3],
    pub component: VelocityComponent,
    pub target: Option<f64>,
    /// Interpolated value of the last projected solution.
    pub value: f64,
    /// Owned by this rank.
    pub resident: bool,
}

impl ObservationPoint {
    /// Last interpolated value in physical units.
    pub fn measured(&self, scaling: &Scaling) -> f64 {
        scaling.velocity_to_physical(self.value)
    }

    pub fn physical_coordinates(&self, scaling: &Scaling) -> [f64; 3] {
        self.coordinates.map(|c| scaling.length_to_physical(c))
    }
}

/// Projection and comparison vectors of one solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub projection: DVector<f64>,
    pub comparison: DVector<f64>,
}

/// Builds [`Projection`]s and tracks observation points.
#[derive(Debug, Clone)]
pub struct ObservationOperator {
    mode: ObservationMode,
    components: Vec<VelocityComponent>,
    points: Vec<ObservationPoint>,
    advect: bool,
    last_advected_step: Option<usize>,
}

impl ObservationOperator {
    pub fn new(mode: ObservationMode, components: Vec<VelocityComponent>, advect: bool) -> Self {
        Self {
            mode,
            components,
            points: Vec::new(),
            advect,
            last_advected_step: None,
        }
    }

    pub fn with_point(mut self, coordinates: [f64; 3], component: VelocityComponent, target: Option<f64>) -> Self {
        self.points.push(ObservationPoint {
            coordinates,
            component,
            target,
            value: 0.0,
            resident: true,
        });
        self
    }

    /// Operator described by `config`, with coordinates and targets
    /// converted to solver units.
    pub fn from_config(config: &InversionConfig) -> Self {
        let scaling = &config.scaling;
        config.observations.iter().fold(
            Self::new(
                config.observation_mode,
                config.components.clone(),
                config.advect_points,
            ),
            |op, block| {
                op.with_point(
                    block.coordinates.map(|c| scaling.length_to_solver(c)),
                    block.component,
                    block.value.map(|v| scaling.velocity_to_solver(v)),
                )
            },
        )
    }

    pub fn mode(&self) -> ObservationMode {
        self.mode
    }

    pub fn points(&self) -> &[ObservationPoint] {
        &self.points
    }

    /// Targets of the points owned by this rank.
    pub fn local_targets(&self) -> Vec<f64> {
        self.points
            .iter()
            .filter(|p| p.resident)
            .filter_map(|p| p.target)
            .collect()
    }

    /// Mark the points that lie in `subdomain` as owned by this rank.
    pub fn update_residency(&mut self, subdomain: &Subdomain) {
        for point in &mut self.points {
            point.resident = subdomain.contains(point.coordinates);
        }
    }

    /// Build the projection of `solution` and record interpolated values.
    pub fn project(
        &mut self,
        grid: &StaggeredGrid,
        solution: &DVector<f64>,
        surface: Option<&FreeSurface>,
        comm: &impl Communicator,
    ) -> Result<Projection> {
        let n = grid.dof_count();
        if solution.len() != n {
            return Err(InversionError::DimensionMismatch {
                expected: n,
                found: solution.len(),
            });
        }
        let mut projection = DVector::zeros(n);
        let mut comparison = DVector::zeros(n);
        match self.mode {
            ObservationMode::Points => {
                self.project_points(grid, solution, &mut projection, &mut comparison, comm)?
            }
            ObservationMode::WholeDomain => {
                for component in &self.components {
                    projection
                        .rows_range_mut(grid.component_range(*component))
                        .fill(1.0);
                }
            }
            ObservationMode::Surface => {
                let surface = surface.ok_or_else(|| {
                    InversionError::Config(
                        "surface observations need a solver with a free surface".into(),
                    )
                })?;
                for component in &self.components {
                    project_surface(grid, surface, *component, &mut projection);
                }
            }
        }
        Ok(Projection {
            projection,
            comparison,
        })
    }

    fn project_points(
        &mut self,
        grid: &StaggeredGrid,
        solution: &DVector<f64>,
        projection: &mut DVector<f64>,
        comparison: &mut DVector<f64>,
        comm: &impl Communicator,
    ) -> Result<()> {
        let mut values = DVector::zeros(self.points.len());
        for (index, point) in self.points.iter().enumerate() {
            if !point.resident {
                continue;
            }
            let stencil = grid.velocity_stencil(point.component, point.coordinates)?;
            let corners = grid.stencil_corners(point.component, &stencil);
            let interpolated: f64 = corners.iter().map(|(dof, w)| w * solution[*dof]).sum();
            for (dof, weight) in corners {
                projection[dof] = weight;
                if let Some(target) = point.target {
                    // scale corners so the interpolated comparison hits the target
                    comparison[dof] = if interpolated != 0.0 && interpolated.is_finite() {
                        target * solution[dof] / interpolated
                    } else {
                        target
                    };
                }
            }
            values[index] = interpolated;
        }
        comm.sum_vector(&mut values);
        for (point, value) in self.points.iter_mut().zip(values.iter()) {
            point.value = *value;
        }
        debug!(points = self.points.len(), "projected observation points");
        Ok(())
    }

    /// Move resident points with the flow over one timestep.
    ///
    /// Does nothing unless advection is enabled, and at most once per `step`.
    /// Returns whether the points moved.
    pub fn advect(
        &mut self,
        step: usize,
        dt: f64,
        grid: &StaggeredGrid,
        solution: &DVector<f64>,
    ) -> Result<bool> {
        if !self.advect || self.last_advected_step == Some(step) {
            return Ok(false);
        }
        for point in self.points.iter_mut().filter(|p| p.resident) {
            let mut velocity = [0.0; 3];
            for component in VelocityComponent::ALL {
                velocity[component.dim()] = interpolate(grid, solution, component, point.coordinates)?;
            }
            for dim in 0..3 {
                point.coordinates[dim] += velocity[dim] * dt;
            }
            if grid.locate(point.coordinates).is_err() {
                warn!(coordinates = ?point.coordinates, "observation point left the local grid");
                point.resident = false;
            }
        }
        self.last_advected_step = Some(step);
        Ok(true)
    }
}

/// Trilinear interpolation of `component` at `point`.
pub fn interpolate(
    grid: &StaggeredGrid,
    solution: &DVector<f64>,
    component: VelocityComponent,
    point: [f64; 3],
) -> Result<f64> {
    let stencil = grid.velocity_stencil(component, point)?;
    Ok(grid
        .stencil_corners(component, &stencil)
        .iter()
        .map(|(dof, w)| w * solution[*dof])
        .sum())
}

/// Weights of `component` at the free surface of every `(x node, y node)`
/// column. Columns whose surface lies outside the vertical extent of the
/// grid are skipped; horizontal indices are clamped onto the component's
/// own grid.
fn project_surface(
    grid: &StaggeredGrid,
    surface: &FreeSurface,
    component: VelocityComponent,
    projection: &mut DVector<f64>,
) {
    let shape = grid.component_shape(component);
    let (z_start, z_end) = (grid.z.start(), grid.z.end());
    for j in 0..grid.y.nodes().len() {
        for i in 0..grid.x.nodes().len() {
            let Some(z) = surface.elevation(grid, i, j) else {
                continue;
            };
            if !(z >= z_start && z < z_end) {
                continue;
            }
            let Some(cell) = grid.z.find_cell(z) else {
                continue;
            };
            let (k0, k1, w) = if component == VelocityComponent::Z {
                grid.z.node_stencil(cell, z)
            } else {
                grid.z.center_stencil(cell, z)
            };
            let ii = i.min(shape[0] - 1);
            let jj = j.min(shape[1] - 1);
            projection[grid.dof(component, ii, jj, k0)] = 1.0 - w;
            projection[grid.dof(component, ii, jj, k1)] = w;
        }
    }
}
