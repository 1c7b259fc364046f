mod cli;
mod config;
mod terminal;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::Stream;
use tracing::{info, warn};

use harness_core::HarnessConfig;
use harness_scheduler::handlers::register_builtin;
use harness_scheduler::{
    run_batch_until, DispatchRegistry, JsonReportSink, LogReportSink, Plan, ReportSink,
    SchedulerBuilder,
};

use crate::cli::{CliArgs, Command, RunArgs};
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    harness_core::config::load_dotenv();
    let args = CliArgs::parse();
    let terminal = Terminal::new();

    match dispatch(args, &terminal).await {
        Ok(code) => code,
        Err(e) => {
            let _ = terminal.print_error(&format!("{e:#}"));
            ExitCode::from(2)
        }
    }
}

async fn dispatch(args: CliArgs, terminal: &Terminal) -> Result<ExitCode> {
    let mut config = config::load(args.config.as_deref())?;
    let registry = builtin_registry()?;

    match args.command {
        Command::Handlers => {
            let handlers: Vec<_> = registry
                .names()
                .into_iter()
                .map(|name| {
                    let arity = registry.arity_of(&name);
                    (name, arity)
                })
                .collect();
            terminal.print_handlers(&handlers)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(run) => {
            config::apply_run_overrides(&mut config, &run)?;
            run_plan(config, registry, &run, terminal).await
        }
    }
}

fn builtin_registry() -> Result<DispatchRegistry> {
    let mut registry = DispatchRegistry::new();
    register_builtin(&mut registry).context("failed to register built-in handlers")?;
    Ok(registry)
}

/// One item per Ctrl+C; ends if the signal handler cannot be installed.
fn ctrl_c_presses() -> impl Stream<Item = ()> {
    futures::stream::unfold(1u32, |press| async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(press, "Ctrl+C received");
                Some(((), press + 1))
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C");
                None
            }
        }
    })
}

async fn run_plan(
    config: HarnessConfig,
    registry: DispatchRegistry,
    run: &RunArgs,
    terminal: &Terminal,
) -> Result<ExitCode> {
    config.log_summary();

    let plan = Plan::load(&run.plan)
        .with_context(|| format!("failed to load plan: {}", run.plan.display()))?;
    if plan.is_empty() {
        warn!(plan = %run.plan.display(), "plan has no units");
    }
    terminal.print_banner(
        &run.plan.display().to_string(),
        plan.len(),
        config.scheduler.max_concurrency,
    )?;

    let builder = SchedulerBuilder::new(config.scheduler.clone(), Arc::new(registry))
        .artifact_dir(config.report.artifact_dir.clone());

    let report = run_batch_until(plan.units, builder, ctrl_c_presses()).await;

    LogReportSink.write(&report)?;
    JsonReportSink::new(&config.report.report_path)
        .write(&report)
        .with_context(|| format!("failed to write report: {}", config.report.report_path.display()))?;
    terminal.print_report(&report)?;

    Ok(if report.summary.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
