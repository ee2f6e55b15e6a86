//! Staggered (MAC) grid geometry and degree-of-freedom layout.
//!
//! Velocity components live on cell faces: `vx` on x-nodes and y/z-centers,
//! `vy` on y-nodes and x/z-centers, `vz` on z-nodes and x/y-centers. Pressure
//! lives on cell centers. The solution vector stores all `vx`, then all `vy`,
//! then all `vz`, then pressure, each block with `x` varying fastest.
use serde::{Deserialize, Serialize};

use crate::error::{InversionError, Result};
use crate::observation::VelocityComponent;

const AXIS_NAMES: [char; 3] = ['x', 'y', 'z'];

/// Node coordinates along one axis, strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Axis {
    nodes: Vec<f64>,
    centers: Vec<f64>,
}

impl TryFrom<Vec<f64>> for Axis {
    type Error = InversionError;

    fn try_from(nodes: Vec<f64>) -> Result<Self> {
        Axis::new(nodes)
    }
}

impl From<Axis> for Vec<f64> {
    fn from(axis: Axis) -> Self {
        axis.nodes
    }
}

impl Axis {
    pub fn new(nodes: Vec<f64>) -> Result<Self> {
        if nodes.len() < 2 {
            return Err(InversionError::Config(
                "a grid axis needs at least two nodes".into(),
            ));
        }
        if nodes.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(InversionError::Config(
                "grid node coordinates must be strictly increasing".into(),
            ));
        }
        let centers = nodes.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        Ok(Self { nodes, centers })
    }

    pub fn uniform(start: f64, end: f64, cells: usize) -> Result<Self> {
        let h = (end - start) / cells as f64;
        Self::new((0..=cells).map(|i| start + h * i as f64).collect())
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    pub fn cells(&self) -> usize {
        self.centers.len()
    }

    pub fn start(&self) -> f64 {
        self.nodes[0]
    }

    pub fn end(&self) -> f64 {
        self.nodes[self.nodes.len() - 1]
    }

    /// Index of the cell containing `x`, or `None` if `x` is off the axis.
    ///
    /// Starts from the guess of a uniform grid and refines by bisection. A
    /// point on the last node belongs to the last cell.
    pub fn find_cell(&self, x: f64) -> Option<usize> {
        let px = &self.nodes;
        let (mut l, mut r) = (0, px.len() - 1);
        if !(x >= px[l] && x <= px[r]) {
            return None;
        }
        let h = (px[r] - px[l]) / (r - l) as f64;
        let m = (l + ((x - px[l]) / h) as usize).min(r);
        if m == r {
            return Some(r - 1);
        }
        if px[m] <= x {
            l = m;
        }
        if px[m + 1] >= x {
            r = m + 1;
        }
        while r - l > 1 {
            let m = (l + r) / 2;
            if px[m] <= x {
                l = m;
            }
            if px[m] >= x {
                r = m;
            }
        }
        Some(l)
    }

    /// Linear stencil `(i0, i1, w1)` between the nodes bounding `x`.
    pub fn node_stencil(&self, cell: usize, x: f64) -> (usize, usize, f64) {
        let (a, b) = (self.nodes[cell], self.nodes[cell + 1]);
        (cell, cell + 1, ((x - a) / (b - a)).clamp(0.0, 1.0))
    }

    /// Linear stencil between the cell centers bounding `x`.
    ///
    /// Points closer to the boundary than the first (last) center are clamped
    /// onto that center.
    pub fn center_stencil(&self, cell: usize, x: f64) -> (usize, usize, f64) {
        let c = &self.centers;
        if c.len() == 1 {
            return (0, 0, 0.0);
        }
        let below = if x > c[cell] { cell } else { cell.saturating_sub(1) };
        let i0 = below.min(c.len() - 2);
        let w = ((x - c[i0]) / (c[i0 + 1] - c[i0])).clamp(0.0, 1.0);
        (i0, i0 + 1, w)
    }
}

/// Interpolation stencil of one velocity component at one point, per axis.
pub type Stencil = [(usize, usize, f64); 3];

/// Grid of the local subdomain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaggeredGrid {
    pub x: Axis,
    pub y: Axis,
    pub z: Axis,
}

impl StaggeredGrid {
    pub fn new(x: Axis, y: Axis, z: Axis) -> Self {
        Self { x, y, z }
    }

    pub fn axis(&self, dim: usize) -> &Axis {
        match dim {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }

    pub fn cells(&self) -> [usize; 3] {
        [self.x.cells(), self.y.cells(), self.z.cells()]
    }

    pub fn cell_count(&self) -> usize {
        self.cells().iter().product()
    }

    /// Number of `component` unknowns along each axis.
    pub fn component_shape(&self, component: VelocityComponent) -> [usize; 3] {
        let mut shape = self.cells();
        shape[component.dim()] += 1;
        shape
    }

    fn component_len(&self, component: VelocityComponent) -> usize {
        self.component_shape(component).iter().product()
    }

    pub fn component_offset(&self, component: VelocityComponent) -> usize {
        VelocityComponent::ALL
            .iter()
            .take_while(|c| **c != component)
            .map(|c| self.component_len(*c))
            .sum()
    }

    pub fn component_range(&self, component: VelocityComponent) -> core::ops::Range<usize> {
        let start = self.component_offset(component);
        start..start + self.component_len(component)
    }

    pub fn velocity_dof_count(&self) -> usize {
        VelocityComponent::ALL
            .iter()
            .map(|c| self.component_len(*c))
            .sum()
    }

    pub fn dof_count(&self) -> usize {
        self.velocity_dof_count() + self.cell_count()
    }

    /// Position of `component` at `(i, j, k)` in the solution vector.
    pub fn dof(&self, component: VelocityComponent, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.component_shape(component);
        self.component_offset(component) + i + nx * (j + ny * k)
    }

    pub fn pressure_dof(&self, cell: usize) -> usize {
        self.velocity_dof_count() + cell
    }

    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.cells();
        i + nx * (j + ny * k)
    }

    /// Cell containing `point`.
    pub fn locate(&self, point: [f64; 3]) -> Result<[usize; 3]> {
        let mut cell = [0; 3];
        for dim in 0..3 {
            cell[dim] = self.axis(dim).find_cell(point[dim]).ok_or(
                InversionError::PointOutsideGrid {
                    axis: AXIS_NAMES[dim],
                    coordinate: point[dim],
                },
            )?;
        }
        Ok(cell)
    }

    /// Trilinear stencil of `component` around `point`.
    ///
    /// The component's own axis interpolates between nodes, the other two
    /// between cell centers.
    pub fn velocity_stencil(&self, component: VelocityComponent, point: [f64; 3]) -> Result<Stencil> {
        let cell = self.locate(point)?;
        let mut stencil = [(0, 0, 0.0); 3];
        for dim in 0..3 {
            let axis = self.axis(dim);
            stencil[dim] = if dim == component.dim() {
                axis.node_stencil(cell[dim], point[dim])
            } else {
                axis.center_stencil(cell[dim], point[dim])
            };
        }
        Ok(stencil)
    }

    /// The eight `(dof, weight)` pairs of a stencil.
    pub fn stencil_corners(&self, component: VelocityComponent, stencil: &Stencil) -> [(usize, f64); 8] {
        let [(i0, i1, wx), (j0, j1, wy), (k0, k1, wz)] = *stencil;
        let mut corners = [(0, 0.0); 8];
        let mut n = 0;
        for (k, fz) in [(k0, 1.0 - wz), (k1, wz)] {
            for (j, fy) in [(j0, 1.0 - wy), (j1, wy)] {
                for (i, fx) in [(i0, 1.0 - wx), (i1, wx)] {
                    corners[n] = (self.dof(component, i, j, k), fx * fy * fz);
                    n += 1;
                }
            }
        }
        corners
    }
}

/// Coordinate box owned by this rank.
///
/// A point is resident when `lo <= x < hi` on every axis; on axes where this
/// rank holds the last slab the upper bound is inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subdomain {
    pub lo: [f64; 3],
    pub hi: [f64; 3],
    pub last: [bool; 3],
}

impl Subdomain {
    /// Subdomain covering the whole grid of a single-rank run.
    pub fn whole(grid: &StaggeredGrid) -> Self {
        Self {
            lo: [grid.x.start(), grid.y.start(), grid.z.start()],
            hi: [grid.x.end(), grid.y.end(), grid.z.end()],
            last: [true; 3],
        }
    }

    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|d| {
            point[d] >= self.lo[d]
                && (point[d] < self.hi[d] || (self.last[d] && point[d] <= self.hi[d]))
        })
    }
}

/// Elevation of the free surface above each `(x node, y node)` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeSurface {
    pub topography: Vec<f64>,
}

impl FreeSurface {
    pub fn flat(grid: &StaggeredGrid, elevation: f64) -> Self {
        let columns = grid.x.nodes().len() * grid.y.nodes().len();
        Self {
            topography: vec![elevation; columns],
        }
    }

    pub fn elevation(&self, grid: &StaggeredGrid, i: usize, j: usize) -> Option<f64> {
        self.topography
            .get(i + grid.x.nodes().len() * j)
            .copied()
    }
}
