use approx::assert_relative_eq;

use super::test_helpers::{config, database, MockForwardSolver, TempPath};
use super::*;
use crate::config::{ObservationBlock, ParameterBlock, MAX_PARAMETERS};
use crate::objective::GradientMode;
use crate::observation::VelocityComponent;

#[test]
fn scaling_law_run_writes_report() {
    let report_file = TempPath::new("scaling-law.dat");
    let mut cfg = config();
    cfg.compute_scaling_law = true;
    cfg.scaling_law_file = report_file.0.clone();
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let report = ctx.run().unwrap();

    assert_eq!(report.mode, RunMode::AdjointGradients);
    assert!(report.minimization.is_none());
    let law = report.scaling_law.unwrap();
    // v ~ rho (1 + alpha) / eta
    assert_relative_eq!(law.terms[0].exponent, 1.0, max_relative = 1e-5);
    assert_relative_eq!(law.terms[1].exponent, -1.0, max_relative = 1e-5);
    assert_relative_eq!(law.terms[2].exponent, 0.5 / 1.5, max_relative = 1e-5);
    assert_relative_eq!(law.velocity_check(), law.objective, max_relative = 1e-10);

    let written = std::fs::read_to_string(&report_file.0).unwrap();
    assert!(written.starts_with("# Scaling Law"));
    assert!(written.contains("mantle"));
}

#[test]
fn synthetic_run_feeds_cost_function_run() {
    let comparison = TempPath::new("comparison.json");
    let mut cfg = config();
    cfg.mode = RunMode::SyntheticForwardRun;
    cfg.use_observation_targets = false;
    cfg.comparison_file = Some(comparison.0.clone());
    let mut ctx = InversionContext::new(cfg.clone(), database(), MockForwardSolver::new()).unwrap();
    let synthetic = ctx.run().unwrap().comparison.unwrap();
    assert_eq!(ctx.solver_mut().calls().len(), 1);

    let loaded = load_comparison(&comparison.0, synthetic.len()).unwrap();
    for (l, s) in loaded.iter().zip(synthetic.iter()) {
        assert_relative_eq!(*l, *s, max_relative = 1e-15);
    }
    assert!(matches!(
        load_comparison(&comparison.0, synthetic.len() + 1),
        Err(InversionError::DimensionMismatch { .. })
    ));

    cfg.mode = RunMode::AdjointGradients;
    cfg.gradient_mode = GradientMode::CostFunction;
    cfg.parameters.truncate(2);
    let mut ctx = InversionContext::new(cfg.clone(), database(), MockForwardSolver::new()).unwrap();
    let evaluation = ctx.run().unwrap().evaluation.unwrap();
    assert!(evaluation.objective.abs() < 1e-20);
    assert!(evaluation.gradient.iter().all(|g| g.abs() < 1e-10));

    // a denser material moves away from the saved field
    let mut heavier = database();
    heavier.set("rho", Some(0), 4.0).unwrap();
    let mut ctx = InversionContext::new(cfg, heavier, MockForwardSolver::new()).unwrap();
    let evaluation = ctx.run().unwrap().evaluation.unwrap();
    assert!(evaluation.objective > 0.0);
    assert!(evaluation.gradient[0] > 0.0);
}

#[test]
fn missing_comparison_file() {
    let mut cfg = config();
    cfg.use_observation_targets = false;
    cfg.comparison_file = Some(TempPath::new("does-not-exist.json").0.clone());
    assert!(matches!(
        InversionContext::new(cfg, database(), MockForwardSolver::new()),
        Err(InversionError::Io(_))
    ));
}

#[test]
fn too_many_parameter_blocks() {
    let mut cfg = config();
    cfg.parameters = vec![ParameterBlock::new("rho", Some(0)); MAX_PARAMETERS + 1];
    assert!(matches!(
        InversionContext::new(cfg, database(), MockForwardSolver::new()),
        Err(InversionError::TooManyParameters { found, .. }) if found == MAX_PARAMETERS + 1
    ));
}

fn descent_config(mode: RunMode) -> InversionConfig {
    let mut cfg = config();
    cfg.mode = mode;
    cfg.gradient_mode = GradientMode::CostFunction;
    cfg.parameters = vec![ParameterBlock::new("rho", Some(0)).with_bounds(1.0, 10.0)];
    cfg
}

/// Observed velocity of the mock solver with `rho = 5`.
fn target() -> f64 {
    let mut db = database();
    db.set("rho", Some(0), 5.0).unwrap();
    let mut cfg = config();
    cfg.parameters.truncate(1);
    let mut ctx = InversionContext::new(cfg, db, MockForwardSolver::new()).unwrap();
    ctx.evaluate(&DVector::from_vec(vec![5.0])).unwrap().objective
}

fn with_target(mut cfg: InversionConfig) -> InversionConfig {
    cfg.observations = vec![ObservationBlock::new(
        [0.5, 0.5, 0.5],
        VelocityComponent::Z,
        Some(target()),
    )];
    cfg
}

#[test]
fn gradient_descent_moves_density_towards_target() {
    let cfg = with_target(descent_config(RunMode::GradientDescent));
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let report = ctx.run().unwrap();
    let minimization = report.minimization.unwrap();

    assert!(minimization.objective_function < minimization.initial_objective_function);
    let rho = minimization.parameters[0];
    assert!(rho > 3.0 && rho <= 10.0);
    assert_eq!(ctx.materials().get("rho", Some(0)).unwrap(), rho);
    assert_eq!(ctx.registry().values()[0], rho);
    assert!(report.evaluation.is_some());
}

#[test]
fn quasi_newton_respects_bounds() {
    let mut cfg = with_target(descent_config(RunMode::QuasiNewton));
    cfg.parameters = vec![ParameterBlock::new("rho", Some(0)).with_bounds(1.0, 4.0)];
    let mut ctx = InversionContext::new(cfg, database(), MockForwardSolver::new()).unwrap();
    let minimization = ctx.run().unwrap().minimization.unwrap();

    assert!(minimization.objective_function <= minimization.initial_objective_function);
    let rho = minimization.parameters[0];
    assert!((3.0..=4.0).contains(&rho));
    assert_eq!(ctx.materials().get("rho", Some(0)).unwrap(), rho);
    assert_eq!(minimization.history[0], 1.0);
}
