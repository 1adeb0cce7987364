use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::thread_rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orderflow::cli::{Cli, Command};
use orderflow::config::OrderFlowConfig;
use orderflow::engine::{ConductorClient, LocalEngine, WorkflowEngine};
use orderflow::setup;
use orderflow::task::TaskHandlers;
use orderflow::ui::RunProgress;
use orderflow::worker::TaskRunner;
use orderflow::workflow::RunState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = OrderFlowConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Register => register(&config).await,
        Command::Worker { pollers } => work(&config, pollers).await,
        Command::Start { count } => start(&config, count).await,
        Command::Simulate { count, confirm } => simulate(&config, count, confirm).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn client(config: &OrderFlowConfig) -> Result<ConductorClient> {
    ConductorClient::with_base_url(config.server_url.clone(), config.credentials())
        .context("failed to build engine client")
}

async fn register(config: &OrderFlowConfig) -> Result<()> {
    let client = client(config)?;
    let flow = setup::register_order_workflow(&client, config).await?;
    let action = setup::ensure_webhook(&client, &setup::order_confirmed_webhook(config)).await?;
    println!(
        "Registered {} v{} ({} task definitions), webhook {}: {action:?}",
        flow.workflow.name,
        flow.workflow.version,
        flow.task_defs.len(),
        config.webhook_id
    );
    Ok(())
}

async fn work(config: &OrderFlowConfig, pollers: Option<usize>) -> Result<()> {
    let client = Arc::new(client(config)?);
    let mut runner = TaskRunner::new(client);
    runner.start_all(
        &TaskHandlers::order_fulfillment(),
        pollers.unwrap_or(config.pollers_per_task),
        config.poll_interval(),
    );
    info!(worker = %runner.worker_id(), pollers = runner.running(), "workers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down workers");
    runner.shutdown();
    runner.wait_workers().await;
    Ok(())
}

async fn start(config: &OrderFlowConfig, count: Option<usize>) -> Result<()> {
    let client = client(config)?;
    let requests = setup::sample_requests(count.unwrap_or(config.sample_orders), &mut thread_rng());
    let run_ids = setup::start_runs(&client, config, &requests).await?;
    for run_id in &run_ids {
        println!("{run_id}");
    }
    Ok(())
}

async fn simulate(config: &OrderFlowConfig, count: Option<usize>, confirm: bool) -> Result<()> {
    let engine = LocalEngine::new(TaskHandlers::order_fulfillment());
    setup::register_order_workflow(&engine, config).await?;
    setup::ensure_webhook(&engine, &setup::order_confirmed_webhook(config)).await?;

    let requests = setup::sample_requests(count.unwrap_or(config.sample_orders), &mut thread_rng());
    for request in &requests {
        let progress = RunProgress::start(&format!("{} ({})", request.ordered_by, request.total));
        let start = setup::start_request(config, request)?;
        let run_id = engine.start_workflow_run(&start).await?;

        let Some(run) = engine.run(&run_id).await else {
            continue;
        };
        progress.update_state(run.state, &run_id);
        if confirm && run.state == RunState::AwaitingConfirmation {
            if let Some(order) = &run.order {
                engine
                    .deliver_webhook(
                        &config.webhook_id,
                        &setup::confirmation_headers(order.number()),
                        setup::confirmation_payload(),
                    )
                    .await?;
            }
        }

        if let Some(record) = engine.audit(&run_id).await {
            progress.retries(record.failed_attempts);
            progress.complete(&record);
            progress.print_audit(&record);
        }
    }
    Ok(())
}
