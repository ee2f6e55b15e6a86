//! Convergence on smooth objectives.
use approx::assert_relative_eq;
use nalgebra::DVector;

use super::test_helpers::Quadratic;
use super::SteepestDescent;
use crate::TerminationReason;

#[test]
fn scalar_quadratic_converges_monotonically() {
    let mut problem = Quadratic::new(vec![3.0], vec![1.0]);
    let report = SteepestDescent::new()
        .with_tolerance(1e-10)
        .with_max_iterations(50)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::ToleranceReached);
    assert!(report.iterations < 50);
    assert!(report.history.windows(2).all(|w| w[1] <= w[0]));
    assert!(*report.history.last().unwrap() < 1e-10);
    assert_relative_eq!(report.parameters[0], 3.0, epsilon = 1e-4);
    assert_eq!(report.number_of_evaluations, problem.evaluations);
}

#[test]
fn anisotropic_quadratic() {
    let mut problem = Quadratic::new(vec![2700.0, -1.0], vec![1e-4, 10.0]);
    let report = SteepestDescent::new()
        .with_tolerance(1e-8)
        .with_max_iterations(200)
        .minimize(DVector::from_vec(vec![3000.0, 1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::ToleranceReached);
    assert!(report.history.windows(2).all(|w| w[1] <= w[0]));
    assert_relative_eq!(report.parameters[0], 2700.0, max_relative = 1e-3);
    assert_relative_eq!(report.parameters[1], -1.0, epsilon = 1e-3);
}

#[test]
fn bounded_minimum_sits_on_the_bound() {
    let problem = Quadratic::new(vec![3.0], vec![1.0]);
    struct Bounded(Quadratic);
    impl crate::ObjectiveProblem<f64> for Bounded {
        fn evaluate(&mut self, p: &DVector<f64>) -> crate::Result<(f64, DVector<f64>)> {
            self.0.evaluate(p)
        }
        fn bounds(&self) -> Option<(DVector<f64>, DVector<f64>)> {
            Some((DVector::from_vec(vec![0.0]), DVector::from_vec(vec![2.0])))
        }
    }
    let mut bounded = Bounded(problem);
    let report = SteepestDescent::new()
        .with_max_iterations(30)
        .minimize(DVector::from_vec(vec![1.0]), &mut bounded)
        .unwrap();
    assert!(report.parameters[0] <= 2.0);
    assert_relative_eq!(report.parameters[0], 2.0, epsilon = 1e-12);
    assert!(report.history.windows(2).all(|w| w[1] <= w[0]));
}
