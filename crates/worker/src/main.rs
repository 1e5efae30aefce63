use anyhow::Context;
use tracing::info;

use docflow_infra::{AppConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = docflow_worker::build_services(&config).await?;

    let pool = WorkerPool::spawn(
        config.workers,
        services.worker_resources.clone(),
        config.worker.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    for (index, stats) in pool.shutdown().await.into_iter().enumerate() {
        info!(
            worker = index,
            leased = stats.leased,
            succeeded = stats.succeeded,
            failed = stats.failed,
            retried = stats.retried,
            loop_errors = stats.loop_errors,
            "worker totals"
        );
    }
    Ok(())
}
