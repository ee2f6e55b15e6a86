use approx::assert_relative_eq;

use super::test_helpers::{config, database, MockCall, MockForwardSolver};
use super::*;
use crate::config::{ObservationBlock, ParameterBlock};
use crate::krylov::GmresConfig;
use crate::objective::GradientMode;
use crate::observation::VelocityComponent;

#[test]
fn finite_differences_run_before_the_main_solve() {
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    let values = ctx.registry().values();
    let evaluation = ctx.evaluate(&values).unwrap();

    assert_eq!(
        ctx.solver_mut().calls(),
        &[
            MockCall::Solve(3.0, 0.5),
            MockCall::Solve(3.0, 0.5 + 0.5e-6),
            MockCall::Solve(3.0, 0.5),
            MockCall::Krylov,
            MockCall::Residual,
            MockCall::Residual,
        ]
    );
    // the returned objective belongs to the unperturbed solve
    assert_eq!(evaluation.fd_reference, Some(evaluation.objective));
    assert_eq!(ctx.materials().get("alpha", None).unwrap(), 0.5);
    assert_eq!(ctx.evaluations(), 1);
}

#[test]
fn hybrid_gradient_matches_closed_form() {
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    let values = ctx.registry().values();
    let evaluation = ctx.evaluate(&values).unwrap();
    let f = evaluation.objective;

    assert!(f > 0.0);
    assert!(evaluation.adjoint.unwrap().converged);
    assert_relative_eq!(evaluation.gradient[0], f / 3.0, max_relative = 1e-6);
    assert_relative_eq!(evaluation.gradient[1], -f / 2.0, max_relative = 1e-6);
    assert_relative_eq!(evaluation.gradient[2], f / 1.5, max_relative = 1e-6);
}

#[test]
fn velocity_scale_enters_objective_and_gradient() {
    let mut scaled = config();
    scaled.scaling = crate::scaling::Scaling::new(1.0, 10.0);
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    let reference = ctx.evaluate(&ctx.registry().values()).unwrap();
    let mut ctx = InversionContext::new(scaled, database(), MockForwardSolver::new()).unwrap();
    let evaluation = ctx.evaluate(&ctx.registry().values()).unwrap();

    assert_relative_eq!(evaluation.objective, 10.0 * reference.objective, max_relative = 1e-12);
    for i in 0..3 {
        assert_relative_eq!(
            evaluation.gradient[i],
            10.0 * reference.gradient[i],
            max_relative = 1e-6
        );
    }
}

#[test]
fn database_follows_evaluated_values() {
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    ctx.evaluate(&DVector::from_vec(vec![4.0, 1.0, 0.25])).unwrap();

    assert_eq!(ctx.materials().get("rho", Some(0)).unwrap(), 4.0);
    assert_eq!(ctx.materials().get("eta", Some(0)).unwrap(), 1.0);
    assert_eq!(ctx.materials().get("alpha", None).unwrap(), 0.25);
    assert_eq!(ctx.solver_mut().solves()[2], (4.0, 0.25));
}

#[test]
fn zero_finite_difference_parameter_fails_before_solving() {
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    let result = ctx.evaluate(&DVector::from_vec(vec![3.0, 2.0, 0.0]));

    assert!(matches!(
        result,
        Err(InversionError::ZeroParameterValue { ref name, phase: None }) if name == "alpha"
    ));
    assert!(ctx.solver_mut().calls().is_empty());
    assert_eq!(ctx.evaluations(), 0);
}

#[test]
fn zero_adjoint_parameter_fails_before_solving() {
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    let result = ctx.evaluate(&DVector::from_vec(vec![0.0, 2.0, 0.5]));

    assert!(matches!(
        result,
        Err(InversionError::ZeroParameterValue { ref name, phase: Some(0) }) if name == "rho"
    ));
    // the finite-difference parameter never reached its solves
    assert!(ctx.solver_mut().calls().is_empty());
    assert_eq!(ctx.materials().get("rho", Some(0)).unwrap(), 3.0);
    assert_eq!(ctx.registry().values()[0], 3.0);
}

#[test]
fn wrong_number_of_values() {
    let mut ctx = InversionContext::new(config(), database(), MockForwardSolver::new()).unwrap();
    assert!(matches!(
        ctx.evaluate(&DVector::from_vec(vec![1.0])),
        Err(InversionError::DimensionMismatch { expected: 3, found: 1 })
    ));
}

#[test]
fn unconverged_adjoint_still_yields_gradients() {
    let mut cfg = config();
    cfg.adjoint_solver = GmresConfig {
        restart: 1,
        max_iterations: 1,
        tolerance: 1e-14,
    };
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let evaluation = ctx.evaluate(&ctx.registry().values()).unwrap();

    assert!(!evaluation.adjoint.unwrap().converged);
    assert!(evaluation.gradient.iter().all(|g| g.is_finite()));
}

#[test]
fn density_field_replaces_scalar_gradient() {
    let mut cfg = config();
    cfg.parameters = vec![ParameterBlock::new("rho", Some(0))];
    cfg.field_sensitivity = true;
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let evaluation = ctx.evaluate(&ctx.registry().values()).unwrap();

    assert_eq!(evaluation.gradient.as_slice(), &[0.0]);
    let field = evaluation.density_gradient.unwrap();
    assert_eq!(field.len(), 1);
    assert_relative_eq!(field[0], evaluation.objective / 3.0, max_relative = 1e-6);
}

#[test]
fn matching_target_has_zero_cost() {
    let mut cfg = config();
    cfg.parameters.truncate(2);
    let mut ctx = InversionContext::new(cfg.clone(), database(), MockForwardSolver::new()).unwrap();
    // with unit velocity scale the objective is the interpolated velocity
    let velocity = ctx.evaluate(&ctx.registry().values()).unwrap().objective;

    cfg.gradient_mode = GradientMode::CostFunction;
    cfg.observations = vec![ObservationBlock::new(
        [0.5, 0.5, 0.5],
        VelocityComponent::Z,
        Some(velocity),
    )];
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let evaluation = ctx.evaluate(&ctx.registry().values()).unwrap();

    assert!(evaluation.objective.abs() < 1e-20);
    assert!(evaluation.gradient.iter().all(|g| g.abs() < 1e-10));
}

#[test]
fn points_advect_once_per_timestep() {
    let mut cfg = config();
    cfg.advect_points = true;
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let values = ctx.registry().values();

    ctx.evaluate(&values).unwrap();
    let moved = ctx.observations().points()[0].coordinates;
    assert!(moved[2] > 0.5);

    ctx.evaluate(&values).unwrap();
    assert_eq!(ctx.observations().points()[0].coordinates, moved);
}
