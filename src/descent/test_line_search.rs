use approx::assert_relative_eq;
use nalgebra::DVector;

use super::test_helpers::MockProblem;
use super::SteepestDescent;
use crate::TerminationReason;
use crate::error::InversionError;

#[test]
fn rejected_steps_are_shrunk() {
    let mut problem = MockProblem::new(vec![
        (4.0, vec![2.0]),
        (5.0, vec![0.0]),
        (4.5, vec![0.0]),
        (3.0, vec![1.0]),
    ]);
    let report = SteepestDescent::new()
        .with_initial_step_scale(0.5)
        .with_shrink(0.25)
        .with_max_iterations(2)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    let p: Vec<f64> = problem.evaluated().iter().map(|p| p[0]).collect();
    // initial step -0.5, then -0.125, then -0.03125
    assert_relative_eq!(p[1], 0.5, epsilon = 1e-15);
    assert_relative_eq!(p[2], 0.875, epsilon = 1e-15);
    assert_relative_eq!(p[3], 0.96875, epsilon = 1e-15);
    assert_eq!(report.number_of_evaluations, 4);
    assert_eq!(report.objective_function, 3.0);
    assert_eq!(report.history, vec![1.0, 0.75]);
}

#[test]
fn equal_objective_is_accepted() {
    let mut problem = MockProblem::new(vec![(2.0, vec![1.0]), (2.0, vec![1.0])]);
    let report = SteepestDescent::new()
        .with_max_iterations(2)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.iterations, 2);
    assert_eq!(report.number_of_evaluations, 2);
}

#[test]
fn divergence_keeps_last_accepted_point() {
    let mut values = vec![(1.0, vec![1.0]), (0.5, vec![1.0])];
    values.extend((0..4).map(|_| (2.0, vec![1.0])));
    let mut problem = MockProblem::new(values);
    let report = SteepestDescent::new()
        .with_max_line_search_iterations(3)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.termination, TerminationReason::LineSearchDiverged);
    // one trial and three backtracks after the second accepted point
    assert_eq!(report.number_of_evaluations, 6);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.objective_function, 0.5);
    assert_relative_eq!(report.parameters[0], 0.9, epsilon = 1e-15);
}

#[test]
fn nan_objective_is_rejected() {
    let mut problem = MockProblem::new(vec![
        (1.0, vec![1.0]),
        (f64::NAN, vec![f64::NAN]),
        (0.25, vec![1.0]),
    ]);
    let report = SteepestDescent::new()
        .with_max_iterations(2)
        .minimize(DVector::from_vec(vec![1.0]), &mut problem)
        .unwrap();
    assert_eq!(report.number_of_evaluations, 3);
    assert_eq!(report.objective_function, 0.25);
}

#[test]
fn problem_errors_are_passed_through() {
    let mut problem = MockProblem::new(vec![(1.0, vec![1.0])]);
    let result = SteepestDescent::new().minimize(DVector::from_vec(vec![1.0]), &mut problem);
    assert!(matches!(result, Err(InversionError::ForwardSolve(_))));
}
