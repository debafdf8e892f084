mod common;

use std::fs;
use std::sync::Arc;

use ampchar::config::Context;
use ampchar::optimizer::{AmplifierObjective, Checkpoint, Objective, OptimizerLoop};
use ampchar::simulation::{CancelToken, Driver, SimulatorBackend};
use ampchar::{AnalysisMode, Error};
use common::*;

/// Same synthetic project with a short, cheap search.
fn quick_context(project: &Project, n_calls: usize) -> Arc<Context> {
    let mut ctx = (*project.ctx).clone();
    let opt = &mut ctx.config.optimizer;
    opt.n_calls = n_calls;
    opt.n_initial_points = 2;
    opt.resume_initial_points = 1;
    opt.acquisition_samples = 200;
    opt.refine_starts = 2;
    opt.refine_iters = 20;
    Arc::new(ctx)
}

fn search(
    ctx: &Arc<Context>,
    backend: Arc<dyn SimulatorBackend>,
) -> OptimizerLoop<AmplifierObjective> {
    let driver = Driver::new(Arc::clone(ctx), backend);
    OptimizerLoop::from_context(AmplifierObjective::new(driver).unwrap(), ctx)
}

fn audit_lines(ctx: &Context) -> Vec<String> {
    fs::read_to_string(ctx.audit_log_path())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn timed_out_candidate_scores_the_penalty_and_is_audited_once() {
    let project = project();
    let ctx = quick_context(&project, 1);
    let backend = Arc::new(TimeoutBackend::default());

    let outcome = search(&ctx, backend.clone()).run(false).unwrap();

    assert_eq!(outcome.best.value, 1e30);
    assert_eq!(outcome.best.point, ctx.config.optimizer.x0);
    assert_eq!(*backend.calls.lock().unwrap(), 1);

    let lines = audit_lines(&ctx);
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split(", ").collect();
    assert_eq!(fields.len(), 1 + ctx.config.optimizer.space.len() + 1);
    assert_eq!(fields.last().unwrap().parse::<f64>().unwrap(), 1e30);
}

#[test]
fn objective_scores_measurements_and_noise() {
    let project = project();
    let ctx = quick_context(&project, 1);
    let backend = Arc::new(SyntheticBackend::default());
    let objective =
        AmplifierObjective::new(Driver::new(Arc::clone(&ctx), backend.clone())).unwrap();

    let record = objective.measure(&ctx.config.optimizer.x0).unwrap();
    assert_eq!(record.get("a1"), Some(57.3));
    assert_eq!(record.get("current"), Some(-5.7e-4));
    assert!((record.get("SNR").unwrap() - expected_snr()).abs() < 1e-6);

    let snr_error = (record.get("SNR").unwrap() - 83.65) * 1e4;
    let expected = 10.0 * 5.7e-4 + 0.1 * snr_error * snr_error;
    let score = objective.evaluate(&ctx.config.optimizer.x0).unwrap();
    assert!((score - expected).abs() <= 1e-9 * expected);

    // per-candidate artifacts are cleaned up
    let leftovers: Vec<_> = fs::read_dir(&ctx.simulations_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_c0000"))
        .collect();
    assert!(leftovers.is_empty());
    assert_eq!(backend.modes().len(), 4);
}

#[test]
fn resume_continues_from_the_checkpoint() {
    let project = project();
    let ctx = quick_context(&project, 4);
    let backend = Arc::new(SyntheticBackend::default());

    let first = search(&ctx, backend.clone()).run(false).unwrap();
    assert_eq!(first.total_observations, 4);
    assert!(first.best.value.is_finite() && first.best.value < 1e30);

    let saved = Checkpoint::load(ctx.checkpoint_path()).unwrap();
    assert_eq!(saved.observations.len(), 4);
    assert_eq!(saved.names, ["Ibmain", "R34", "Rmp", "Sa_b", "Sa", "Cin"]);
    for obs in &saved.observations {
        for (dim, v) in ctx.config.optimizer.space.iter().zip(&obs.point) {
            assert!(dim.contains(*v), "{} = {} outside bounds", dim.name, v);
        }
    }

    let ctx = quick_context(&project, 2);
    let second = search(&ctx, backend).run(true).unwrap();
    assert_eq!(second.evaluations, 2);
    assert_eq!(second.total_observations, 6);
    assert_eq!(Checkpoint::load(ctx.checkpoint_path()).unwrap().observations.len(), 6);
    assert_eq!(audit_lines(&ctx).len(), 6);
}

#[test]
fn separate_sessions_never_share_candidate_files() {
    let project = project();
    let mut ctx = (*quick_context(&project, 1)).clone();
    ctx.config.optimizer.keep_artifacts = true;
    let ctx = Arc::new(ctx);
    let backend: Arc<dyn SimulatorBackend> = Arc::new(SyntheticBackend::default());
    let measure_circuit = &ctx.config.project.measure_circuit;

    let session = |backend| AmplifierObjective::new(Driver::new(Arc::clone(&ctx), backend)).unwrap();
    let first = session(Arc::clone(&backend));
    let second = session(backend);
    assert_ne!(first.tag(), second.tag());

    let x0 = ctx.config.optimizer.x0.clone();
    let mut moved = x0.clone();
    moved[1] = 91.0;
    first.evaluate(&x0).unwrap();
    second.evaluate(&moved).unwrap();

    let netlist = |objective: &AmplifierObjective| {
        let path = ctx
            .simulations_dir
            .join(format!("{}_{}_c00000.net", measure_circuit, objective.tag()));
        fs::read_to_string(path).unwrap()
    };
    assert!(netlist(&first).contains("R34=95"));
    assert!(netlist(&second).contains("R34=91"));

    let kept = fs::read_dir(&ctx.simulations_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "net"))
        .count();
    assert_eq!(kept, 4);
}

#[test]
fn cancellation_stops_the_search_with_prior_calls_saved() {
    let project = project();
    let ctx = quick_context(&project, 5);
    // two candidates complete, the third is interrupted in its first run
    let backend = Arc::new(CancellingBackend::after(4));

    let err = search(&ctx, backend.clone()).run(false).unwrap_err();
    assert!(matches!(err, Error::Cancelled(AnalysisMode::Measure)));
    assert_eq!(*backend.calls.lock().unwrap(), 5);

    let saved = Checkpoint::load(ctx.checkpoint_path()).unwrap();
    assert_eq!(saved.observations.len(), 2);
    assert_eq!(audit_lines(&ctx).len(), 2);
}

#[test]
fn fired_token_prevents_any_simulation() {
    let project = project();
    let ctx = quick_context(&project, 3);
    let backend = Arc::new(SyntheticBackend::default());
    let (handle, token) = CancelToken::new();
    handle.cancel();

    let driver = Driver::new(Arc::clone(&ctx), backend.clone()).with_cancel(token);
    let search = OptimizerLoop::from_context(AmplifierObjective::new(driver).unwrap(), &ctx);

    assert!(matches!(search.run(false), Err(Error::Cancelled(_))));
    assert!(backend.modes().is_empty());
    assert!(!ctx.audit_log_path().exists());
}
