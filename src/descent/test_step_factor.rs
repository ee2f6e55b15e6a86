use approx::assert_relative_eq;
use nalgebra::DVector;

use super::test_helpers::{MockCall, MockProblem};
use super::SteepestDescent;
use crate::TerminationReason;

#[test]
fn first_update_is_relative_to_parameters() {
    // p = (2, 0, 5), g = (4, -0.5, 0)
    let mut problem = MockProblem::new(vec![
        (10.0, vec![4.0, -0.5, 0.0]),
        (9.0, vec![1.0, 1.0, 1.0]),
    ]);
    let report = SteepestDescent::new()
        .with_initial_step_scale(0.1)
        .with_max_iterations(2)
        .minimize(DVector::from_vec(vec![2.0, 0.0, 5.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::IterationCap);
    assert_eq!(report.iterations, 2);
    let evaluated = problem.evaluated();
    assert_eq!(evaluated.len(), 2);
    // |0.1 * 2 / 4| * 4 = 0.2, |0.1 / 0.5| * 0.5 = 0.1, zero gradient stays put
    assert_relative_eq!(evaluated[1][0], 1.8, epsilon = 1e-15);
    assert_relative_eq!(evaluated[1][1], 0.1, epsilon = 1e-15);
    assert_eq!(evaluated[1][2], 5.0);
    assert_eq!(report.history, vec![1.0, 0.9]);
}

#[test]
fn factors_grow_up_to_the_cap() {
    // constant gradient, strictly decreasing objective
    let values = (0..5).map(|i| (10.0 - i as f64, vec![1.0])).collect();
    let mut problem = MockProblem::new(values);
    let report = SteepestDescent::new()
        .with_initial_step_scale(0.5)
        .with_growth(3.0)
        .with_max_step_factor(2.0)
        .with_max_iterations(5)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.iterations, 5);
    let p: Vec<f64> = problem.evaluated().iter().map(|p| p[0]).collect();
    let steps: Vec<f64> = p.windows(2).map(|w| w[1] - w[0]).collect();
    // factors 0.5, 1.5, 2 (capped), 2
    assert_relative_eq!(steps[0], -0.5, epsilon = 1e-15);
    assert_relative_eq!(steps[1], -1.5, epsilon = 1e-15);
    assert_relative_eq!(steps[2], -2.0, epsilon = 1e-15);
    assert_relative_eq!(steps[3], -2.0, epsilon = 1e-15);
}

#[test]
fn trial_points_are_projected_onto_bounds() {
    let mut problem = MockProblem::new(vec![(1.0, vec![-10.0, 10.0]), (0.5, vec![0.0, 0.0])])
        .with_bounds(vec![0.0, 0.9], vec![1.1, 2.0]);
    SteepestDescent::new()
        .with_initial_step_scale(1.0)
        .with_max_iterations(2)
        .minimize(DVector::from_vec(vec![1.0, 1.0]), &mut problem)
        .unwrap();
    assert_eq!(problem.calls()[0], MockCall::Bounds);
    assert_eq!(problem.evaluated()[1], vec![1.1, 0.9]);
}

#[test]
fn zero_initial_objective_is_converged() {
    let mut problem = MockProblem::new(vec![(0.0, vec![1.0])]);
    let report = SteepestDescent::new()
        .minimize(DVector::from_vec(vec![3.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::ToleranceReached);
    assert_eq!(report.number_of_evaluations, 1);
}

#[test]
fn zero_gradient_stops_without_resolving() {
    let mut problem = MockProblem::new(vec![(4.0, vec![0.0, 0.0]), (4.0, vec![0.0, 0.0])]);
    let report = SteepestDescent::new()
        .with_max_iterations(10)
        .minimize(DVector::from_vec(vec![1.0, 2.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::GradientTolerance);
    assert_eq!(report.number_of_evaluations, 1);
    assert_eq!(problem.evaluated(), vec![vec![1.0, 2.0]]);
}

#[test]
fn step_held_by_bounds_stops() {
    // minimum beyond the upper bound
    let mut problem = MockProblem::new(vec![(1.0, vec![-1.0]), (0.5, vec![-1.0]), (0.5, vec![-1.0])])
        .with_bounds(vec![0.0], vec![1.5]);
    let report = SteepestDescent::new()
        .with_initial_step_scale(1.0)
        .with_max_iterations(10)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::GradientTolerance);
    assert_eq!(problem.evaluated(), vec![vec![1.0], vec![1.5]]);
    assert_eq!(report.parameters[0], 1.5);
}
