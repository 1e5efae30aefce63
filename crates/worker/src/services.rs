//! Service wiring.
//!
//! `USE_PERSISTENT_STORES=true` selects the Postgres stores (migrations run at
//! startup); otherwise everything lives in process memory, which is only useful
//! for local runs and tests. Uploaded bytes always go to the local blob root.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use docflow_ai::{DisabledGenerator, OpenAiClient, RetryingGenerator, TextGenerator};
use docflow_infra::{
    AppConfig, BlobStore, DocumentStore, InMemoryDocumentStore, InMemoryJobQueue, IngestService,
    JobQueue, LocalFileStorage, PostgresDocumentStore, PostgresJobQueue, PostgresResultStore,
    PostgresRunStore, StatusReader, StepDependencies, WorkerResources, builtin_steps, db,
};
use docflow_workflow::{
    InMemoryResultStore, InMemoryRunStore, ResultStore, RunStore, StepRegistry, WorkflowExecutor,
    WorkflowRegistry,
};

/// Everything the process needs, wired once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub intake: IngestService,
    pub status: StatusReader,
    pub worker_resources: WorkerResources,
    pub workflows: Arc<WorkflowRegistry>,
    pub steps: Arc<StepRegistry>,
}

struct Stores {
    documents: Arc<dyn DocumentStore>,
    queue: Arc<dyn JobQueue>,
    runs: Arc<dyn RunStore>,
    results: Arc<dyn ResultStore>,
}

fn in_memory_stores(config: &AppConfig) -> Stores {
    info!("using in-memory stores");
    Stores {
        documents: Arc::new(InMemoryDocumentStore::new()),
        queue: Arc::new(InMemoryJobQueue::new().with_max_attempts(config.max_attempts)),
        runs: Arc::new(InMemoryRunStore::new()),
        results: Arc::new(InMemoryResultStore::new()),
    }
}

async fn persistent_stores(config: &AppConfig, database_url: &str) -> anyhow::Result<Stores> {
    let max_connections = u32::try_from(config.workers + 4).unwrap_or(u32::MAX);
    let pool = db::connect(database_url, max_connections)
        .await
        .context("failed to connect to Postgres")?;
    db::migrate(&pool).await.context("failed to run migrations")?;
    info!(max_connections, "using Postgres stores");

    Ok(Stores {
        documents: Arc::new(PostgresDocumentStore::new(pool.clone())),
        queue: Arc::new(PostgresJobQueue::new(pool.clone()).with_max_attempts(config.max_attempts)),
        runs: Arc::new(PostgresRunStore::new(pool.clone())),
        results: Arc::new(PostgresResultStore::new(pool)),
    })
}

fn generator(config: &AppConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    match &config.openai {
        Some(openai) => {
            info!(model = %openai.model, base_url = %openai.base_url, "text generation enabled");
            let client = OpenAiClient::new(openai.clone()).context("failed to build OpenAI client")?;
            Ok(Arc::new(RetryingGenerator::new(client, config.generation_retry.clone())))
        }
        None => {
            warn!("OPENAI_API_KEY not set; invoice extraction will fail");
            Ok(Arc::new(DisabledGenerator))
        }
    }
}

fn workflows(config: &AppConfig) -> anyhow::Result<WorkflowRegistry> {
    match &config.workflows_file {
        Some(path) => WorkflowRegistry::from_file(path)
            .with_context(|| format!("failed to load workflows from {}", path.display())),
        None => Ok(WorkflowRegistry::builtin()),
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let stores = match (config.use_persistent_stores, config.database_url.as_deref()) {
        (true, Some(url)) => persistent_stores(config, url).await?,
        (true, None) => anyhow::bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"),
        (false, _) => in_memory_stores(config),
    };
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalFileStorage::new(config.blob_root.clone()));

    let workflows = Arc::new(workflows(config)?);
    let steps = Arc::new(builtin_steps(StepDependencies {
        documents: stores.documents.clone(),
        blobs: blobs.clone(),
        results: stores.results.clone(),
        generator: generator(config)?,
    })?);

    for (workflow, version, step) in steps.missing_steps(&workflows) {
        warn!(%workflow, %version, %step, "workflow references an unregistered step");
    }
    info!(workflows = workflows.len(), steps = steps.names().len(), "registries loaded");

    let executor = WorkflowExecutor::new(
        workflows.clone(),
        steps.clone(),
        stores.runs.clone(),
        stores.results.clone(),
    );

    Ok(AppServices {
        intake: IngestService::new(blobs, stores.documents.clone(), stores.queue.clone()),
        status: StatusReader::new(
            stores.documents.clone(),
            stores.queue.clone(),
            stores.runs,
            stores.results,
        ),
        worker_resources: WorkerResources {
            queue: stores.queue,
            documents: stores.documents,
            executor: Arc::new(executor),
        },
        workflows,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{CustomerId, RunStatus};
    use docflow_infra::{PollOutcome, Upload, Worker};
    use tokio_util::sync::CancellationToken;

    fn config(blob_root: &std::path::Path, vars: &[(&str, &str)]) -> AppConfig {
        let root = blob_root.display().to_string();
        AppConfig::from_lookup(|key| {
            if key == "DOCFLOW_BLOB_ROOT" {
                return Some(root.clone());
            }
            vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn in_memory_services_run_the_echo_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &[]);
        let services = build_services(&config).await.unwrap();
        assert!(services.steps.missing_steps(&services.workflows).is_empty());

        let customer = CustomerId::new("acme").unwrap();
        let receipt = services
            .intake
            .ingest(Upload::new(customer.clone(), "ping.txt", "text/plain", b"ping".to_vec(), "echo"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let worker = Worker::new("test", services.worker_resources.clone(), config.worker.clone());
        let outcome = worker.poll_once(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Succeeded(_)));

        let runs = services
            .status
            .runs_for_document(receipt.document_id, &customer)
            .await
            .unwrap();
        assert_eq!(runs[0].status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn missing_workflows_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &[("DOCFLOW_WORKFLOWS_FILE", "/nonexistent/workflows.json")]);
        assert!(build_services(&config).await.is_err());
    }

    #[tokio::test]
    async fn custom_workflows_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        std::fs::write(
            &path,
            r#"{"workflows":[{"name":"ping","version":"v1","steps":["echo"]}]}"#,
        )
        .unwrap();
        let config = config(dir.path(), &[("DOCFLOW_WORKFLOWS_FILE", path.to_str().unwrap())]);

        let services = build_services(&config).await.unwrap();
        assert_eq!(services.workflows.len(), 1);
        assert!(services.workflows.get("PING", None).is_ok());
    }
}
