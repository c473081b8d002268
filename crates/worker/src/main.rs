use std::sync::Arc;
use std::time::Duration;

use statrig_driver::probe::{CompletionProbe, FolderProbe};
use statrig_events::EventBus;
use statrig_worker::dispatch::{self, DEFAULT_QUEUE_CAPACITY};
use statrig_worker::intake::IntakeLoop;
use statrig_worker::orchestrator::DriverRunner;
use statrig_worker::store::RunStore;
use statrig_worker::{AdmissionScheduler, Orchestrator, PgRunStore, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for the loops to drain before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statrig_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        task_root = %config.task_root.display(),
        process_name = %config.process_name,
        "Worker starting"
    );

    let pool = statrig_db::create_pool(&config.database_url).await?;
    statrig_db::run_migrations(&pool).await?;
    statrig_db::health_check(&pool).await?;

    let bus = Arc::new(EventBus::default());
    let store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool));
    let runner = Arc::new(DriverRunner::new(config.driver_config(), Arc::clone(&bus)));
    let probe: Arc<dyn CompletionProbe> = Arc::new(FolderProbe::new(config.process_name.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        runner,
        probe,
        Arc::clone(&bus),
        config.task_root.clone(),
    ));

    let (dispatch_handle, dispatch_rx) = dispatch::queue(DEFAULT_QUEUE_CAPACITY);
    let scheduler = Arc::new(AdmissionScheduler::new(
        Arc::clone(&store),
        dispatch_handle.clone(),
        Duration::from_secs(config.settle_delay_secs),
    ));

    let cancel = CancellationToken::new();

    let run_loop = tokio::spawn(dispatch::run_loop(
        dispatch_rx,
        dispatch_handle.in_flight().clone(),
        orchestrator,
        Arc::clone(&scheduler),
        cancel.child_token(),
    ));

    let intake = IntakeLoop::new(
        store,
        dispatch_handle,
        scheduler,
        Duration::from_secs(config.intake_poll_secs),
    );
    let intake_cancel = cancel.child_token();
    let intake_loop = tokio::spawn(async move { intake.run(intake_cancel).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    for (name, handle) in [("intake", intake_loop), ("run loop", run_loop)] {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
            Err(_) => tracing::warn!(task = name, "Task did not stop within the grace period"),
        }
    }

    tracing::info!("Worker stopped");
    Ok(())
}
