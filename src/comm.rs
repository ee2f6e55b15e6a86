//! Collective reductions across the ranks that share one decomposed grid.
//!
//! Every rank must call the same reductions in the same order. The engine
//! only needs global sums of scalars and vectors, so the trait is
//! small enough to sit on top of any message-passing layer.
use nalgebra::DVector;

pub trait Communicator {
    fn rank(&self) -> usize;

    /// Global sum of a scalar.
    fn sum(&self, value: f64) -> f64;

    /// Element-wise global sum, in place.
    fn sum_vector(&self, values: &mut DVector<f64>);

    /// Value held by the highest rank with `present` set, `0` if none.
    fn from_last_holder(&self, value: f64, present: bool) -> f64;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Communicator of a run on a single process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn sum(&self, value: f64) -> f64 {
        value
    }

    fn sum_vector(&self, _values: &mut DVector<f64>) {}

    fn from_last_holder(&self, value: f64, present: bool) -> f64 {
        if present {
            value
        } else {
            0.0
        }
    }
}
