//! Intake -> queue -> worker -> executor -> status, all in memory.

use std::sync::Arc;

use docflow_ai::{ScriptedGenerator, TextGenerator};
use docflow_core::{CustomerId, DocumentStatus, JobStatus, RunStatus, StepStatus};
use docflow_infra::{
    IngestService, InMemoryBlobStore, InMemoryDocumentStore, InMemoryJobQueue, JobQueue,
    PollOutcome, StatusReader, StepDependencies, Upload, Worker, WorkerConfig, WorkerResources,
    builtin_steps,
};
use docflow_workflow::{
    InMemoryResultStore, InMemoryRunStore, ResultStore, RunStore, WorkflowExecutor,
    WorkflowRegistry,
};
use tokio_util::sync::CancellationToken;

const INVOICE_TEXT: &str = "ACME GmbH\nInvoice INV-2024-001 dated 2024-05-02\nConsulting 4 x 25.00 = 100.00\nVAT 21.00\nTotal 121.00 EUR\n";

struct Pipeline {
    intake: IngestService,
    worker: Worker,
    status: StatusReader,
    queue: Arc<InMemoryJobQueue>,
    runs: Arc<InMemoryRunStore>,
    results: Arc<InMemoryResultStore>,
    generator: Arc<ScriptedGenerator>,
}

fn pipeline(generator: ScriptedGenerator) -> Pipeline {
    let blobs = Arc::new(InMemoryBlobStore::new());
    let documents = Arc::new(InMemoryDocumentStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let runs = Arc::new(InMemoryRunStore::new());
    let results = Arc::new(InMemoryResultStore::new());
    let generator = Arc::new(generator);

    let steps = builtin_steps(StepDependencies {
        documents: documents.clone(),
        blobs: blobs.clone(),
        results: results.clone(),
        generator: generator.clone() as Arc<dyn TextGenerator>,
    })
    .unwrap();
    let executor = WorkflowExecutor::new(
        Arc::new(WorkflowRegistry::builtin()),
        Arc::new(steps),
        runs.clone(),
        results.clone(),
    );

    Pipeline {
        intake: IngestService::new(blobs, documents.clone(), queue.clone()),
        worker: Worker::new(
            "pipeline",
            WorkerResources {
                queue: queue.clone(),
                documents: documents.clone(),
                executor: Arc::new(executor),
            },
            WorkerConfig::default(),
        ),
        status: StatusReader::new(documents, queue.clone(), runs.clone(), results.clone()),
        queue,
        runs,
        results,
        generator,
    }
}

fn acme() -> CustomerId {
    CustomerId::new("acme").unwrap()
}

#[tokio::test]
async fn malformed_generator_output_fails_the_invoice_job() {
    let p = pipeline(ScriptedGenerator::always("Sorry, I cannot help with that."));
    let receipt = p
        .intake
        .ingest(Upload::new(
            acme(),
            "invoice.txt",
            "text/plain",
            INVOICE_TEXT.as_bytes().to_vec(),
            "invoice",
        ))
        .await
        .unwrap();
    let job_id = receipt.job_id.unwrap();

    let outcome = p.worker.poll_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, PollOutcome::Failed(job_id));

    let job = p.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("invalid JSON from generator"));

    let runs = p.runs.runs_for_document(receipt.document_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);

    let steps = p.runs.step_runs(runs[0].id).await.unwrap();
    let summary: Vec<_> = steps.iter().map(|s| (s.step_name.as_str(), s.status)).collect();
    assert_eq!(
        summary,
        vec![
            ("text.extract", StepStatus::Succeeded),
            ("invoice.extract.v1", StepStatus::Failed),
        ]
    );

    let types: Vec<_> = p
        .results
        .get_by_run(runs[0].id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.result_type)
        .collect();
    assert_eq!(types, vec!["DocText", "InvoiceExtractDiagnostics"]);

    let view = p.status.document_status(receipt.document_id, &acme()).await.unwrap();
    assert_eq!(view.document.status, DocumentStatus::Failed);
    assert!(
        p.status
            .download(receipt.document_id, &acme(), "InvoiceCsv", None)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(p.generator.call_count(), 1);
}

#[tokio::test]
async fn invoice_v2_produces_downloadable_exports() {
    let p = pipeline(ScriptedGenerator::always(
        r#"```json
{"invoiceNumber":"INV-2024-001","invoiceDate":"2024-05-02","sellerName":"ACME GmbH","currency":"EUR",
 "subtotal":100.00,"vatTotal":21.00,"total":121.00,
 "lineItems":[{"description":"Consulting","quantity":4,"unitPrice":25.00,"lineTotal":100.00,"vatRate":21}]}
```"#,
    ));
    let receipt = p
        .intake
        .ingest(
            Upload::new(
                acme(),
                "invoice.txt",
                "text/plain",
                INVOICE_TEXT.as_bytes().to_vec(),
                "invoice",
            )
            .with_version("v2"),
        )
        .await
        .unwrap();

    let outcome = p.worker.poll_once(&CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, PollOutcome::Succeeded(_)));

    let view = p.status.document_status(receipt.document_id, &acme()).await.unwrap();
    assert_eq!(view.document.status, DocumentStatus::Completed);
    assert_eq!(view.job.unwrap().status, JobStatus::Done);
    assert_eq!(view.steps.len(), 5);
    assert!(view.steps.iter().all(|s| s.status == StepStatus::Succeeded));

    let report = p
        .status
        .latest_result(receipt.document_id, &acme(), "ValidationReport", Some("v1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.payload["isValid"], true, "{}", report.payload);

    let csv = p
        .status
        .download(receipt.document_id, &acme(), "invoicecsv", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(csv.content_type, "text/csv");
    assert_eq!(csv.file_name, format!("invoice_{}.csv", receipt.document_id));
    let text = String::from_utf8(csv.bytes).unwrap();
    assert!(text.contains("INV-2024-001,2024-05-02,,ACME GmbH"));
    assert!(text.contains("Consulting,4,25.0,100.0,21"));

    let json = p
        .status
        .download(receipt.document_id, &acme(), "InvoiceJson", None)
        .await
        .unwrap()
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&json.bytes).unwrap();
    assert_eq!(parsed["total"], 121.0);
}

#[tokio::test]
async fn echo_workflow_runs_end_to_end() {
    let p = pipeline(ScriptedGenerator::new(Vec::new()));
    let receipt = p
        .intake
        .ingest(Upload::new(acme(), "ping.txt", "text/plain", b"ping".to_vec(), "echo"))
        .await
        .unwrap();

    let outcome = p.worker.poll_once(&CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, PollOutcome::Succeeded(_)));
    assert_eq!(
        p.worker.poll_once(&CancellationToken::new()).await.unwrap(),
        PollOutcome::Idle
    );

    let echo = p
        .status
        .latest_result(receipt.document_id, &acme(), "echo", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echo.version, "v1");
    assert_eq!(echo.payload["ok"], true);
    assert_eq!(echo.payload["documentId"], receipt.document_id.to_string());

    let runs = p
        .status
        .runs_for_document(receipt.document_id, &acme())
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
    assert_eq!(p.generator.call_count(), 0);
}

#[tokio::test]
async fn duplicate_upload_is_processed_once() {
    let p = pipeline(ScriptedGenerator::new(Vec::new()));
    let upload = || Upload::new(acme(), "ping.txt", "text/plain", b"same".to_vec(), "echo");

    let first = p.intake.ingest(upload()).await.unwrap();
    let second = p.intake.ingest(upload()).await.unwrap();
    assert_eq!(first.document_id, second.document_id);
    assert!(second.job_id.is_none());

    assert!(matches!(
        p.worker.poll_once(&CancellationToken::new()).await.unwrap(),
        PollOutcome::Succeeded(_)
    ));
    assert_eq!(
        p.worker.poll_once(&CancellationToken::new()).await.unwrap(),
        PollOutcome::Idle
    );
}
