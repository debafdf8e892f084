use std::sync::{Arc, Mutex};

use clap::Parser;
use log::{info, warn};

use crate::cli::args::{Args, Command};
use crate::config::Context;
use crate::optimizer::{AmplifierObjective, OptimizerLoop};
use crate::pipeline::{Evaluation, Pipeline};
use crate::report::ReportAssembler;
use crate::simulation::{CancelToken, Driver, NgspiceRunner, SimulatorBackend};
use crate::types::ParameterVector;
use crate::units::parse_param_line;
use crate::Result;

pub mod args;

pub fn run() -> Result<()> {
    let args = Args::parse();

    info!("Reading configuration file {}", args.config.display());
    let mut ctx = Context::from_file(&args.config)?;
    if let Command::Optimize {
        n_calls: Some(n), ..
    } = &args.command
    {
        ctx.config.optimizer.n_calls = *n;
    }
    ctx.ensure_dirs()?;

    let ctx = Arc::new(ctx);
    let backend: Arc<dyn SimulatorBackend> =
        Arc::new(NgspiceRunner::new(ctx.config.simulator.clone()));
    let driver = Driver::new(Arc::clone(&ctx), backend).with_cancel(cancel_on_interrupt());

    match args.command {
        Command::Evaluate {
            no_simulate,
            params,
            no_report,
        } => {
            let mut parameters = ctx.reference_parameters()?;
            if let Some(line) = params {
                let overrides = parse_param_line(&line)?;
                parameters =
                    parameters.with_values(overrides.iter().map(|(k, v)| (k.as_str(), *v)))?;
            }
            let pipeline = Pipeline::new(driver)?;
            let evaluation = pipeline.evaluate(&parameters, !no_simulate)?;
            print_record(&evaluation);
            if !no_report {
                ReportAssembler::new(&ctx).assemble(&evaluation)?;
            }
        }
        Command::Optimize { resume, .. } => {
            let objective = AmplifierObjective::new(driver.clone())?;
            let search = OptimizerLoop::from_context(objective, &ctx);
            let outcome = search.run(resume)?;
            info!(
                "Best score {:.6e} after {} evaluations",
                outcome.best.value, outcome.total_observations
            );

            let best = search.objective().parameters(&outcome.best.point)?;
            let rounded = best.rounded(2)?;
            info!("Characterizing rounded optimum [{}]", rounded);
            characterize(driver, &ctx, &rounded)?;
        }
    }
    Ok(())
}

/// Token fired by the first Ctrl-C; the running simulator is killed and the
/// search stops with its checkpoint intact.
fn cancel_on_interrupt() -> CancelToken {
    let (handle, token) = CancelToken::new();
    let handle = Mutex::new(Some(handle));
    let installed = ctrlc::set_handler(move || {
        if let Some(handle) = handle.lock().ok().and_then(|mut h| h.take()) {
            warn!("Interrupted; stopping the current simulation");
            handle.cancel();
        }
    });
    match installed {
        Ok(()) => token,
        Err(e) => {
            // the rejected handler dropped its handle, which would fire `token`
            warn!("could not install interrupt handler: {}", e);
            CancelToken::never()
        }
    }
}

fn characterize(driver: Driver, ctx: &Context, parameters: &ParameterVector) -> Result<()> {
    let pipeline = Pipeline::new(driver)?;
    let evaluation = pipeline.evaluate(parameters, true)?;
    print_record(&evaluation);
    let outputs = ReportAssembler::new(ctx).assemble(&evaluation)?;
    if let Some(pdf) = outputs.archived.or(outputs.pdf) {
        info!("Report: {}", pdf.display());
    }
    Ok(())
}

fn print_record(evaluation: &Evaluation) {
    println!("Parameters: {}", evaluation.parameters);
    for (name, value) in evaluation.record.iter() {
        println!("\t{:<12} {:.4}", name, value);
    }
}
