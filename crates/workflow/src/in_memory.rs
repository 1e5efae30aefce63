//! In-memory run and result stores.
//!
//! Used by tests and by the process when persistent stores are disabled.
//! Runs are kept in a `HashMap`; results in an append-only `Vec`, which makes
//! insertion order the tie-breaker for "most recent".

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use docflow_core::{
    CorrelationId, DocumentId, ResultId, ResultRecord, Run, RunId, RunStatus, StepRun, StepRunId,
    StepStatus,
};

use crate::store::{ResultStore, RunStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
    step_runs: RwLock<HashMap<StepRunId, StepRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_step(
        &self,
        step_run_id: StepRunId,
        next: StepStatus,
        diagnostics: Option<String>,
    ) -> Result<(), StoreError> {
        let mut steps = self.step_runs.write().map_err(|_| poisoned())?;
        let step = steps
            .get_mut(&step_run_id)
            .ok_or_else(|| StoreError::NotFound(format!("step run {step_run_id}")))?;
        step.transition(next, Utc::now(), diagnostics)?;
        Ok(())
    }

    fn update_run(
        &self,
        run_id: RunId,
        next: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().map_err(|_| poisoned())?;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
        run.transition(next, Utc::now(), error)?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(
        &self,
        document_id: DocumentId,
        workflow_name: &str,
        workflow_version: &str,
        correlation_id: CorrelationId,
    ) -> Result<Run, StoreError> {
        let run = Run {
            id: RunId::new(),
            document_id,
            workflow_name: workflow_name.to_string(),
            workflow_version: workflow_version.to_string(),
            correlation_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        self.runs
            .write()
            .map_err(|_| poisoned())?
            .insert(run.id, run.clone());
        Ok(run)
    }

    async fn mark_run_succeeded(&self, run_id: RunId) -> Result<(), StoreError> {
        self.update_run(run_id, RunStatus::Succeeded, None)
    }

    async fn mark_run_failed(&self, run_id: RunId, error: &str) -> Result<(), StoreError> {
        self.update_run(run_id, RunStatus::Failed, Some(error.to_string()))
    }

    async fn create_step_run(&self, run_id: RunId, step_name: &str) -> Result<StepRun, StoreError> {
        if !self.runs.read().map_err(|_| poisoned())?.contains_key(&run_id) {
            return Err(StoreError::NotFound(format!("run {run_id}")));
        }
        let step = StepRun {
            id: StepRunId::new(),
            run_id,
            step_name: step_name.to_string(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            diagnostics: None,
        };
        self.step_runs
            .write()
            .map_err(|_| poisoned())?
            .insert(step.id, step.clone());
        Ok(step)
    }

    async fn mark_step_succeeded(&self, step_run_id: StepRunId) -> Result<(), StoreError> {
        self.update_step(step_run_id, StepStatus::Succeeded, None)
    }

    async fn mark_step_failed(
        &self,
        step_run_id: StepRunId,
        diagnostics: &str,
    ) -> Result<(), StoreError> {
        self.update_step(step_run_id, StepStatus::Failed, Some(diagnostics.to_string()))
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.read().map_err(|_| poisoned())?.get(&run_id).cloned())
    }

    async fn runs_for_document(&self, document_id: DocumentId) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = runs
            .values()
            .filter(|run| run.document_id == document_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        Ok(result)
    }

    async fn step_runs(&self, run_id: RunId) -> Result<Vec<StepRun>, StoreError> {
        let steps = self.step_runs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = steps
            .values()
            .filter(|step| step.run_id == run_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(result)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<Vec<ResultRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(
        &self,
        run_id: RunId,
        result_type: &str,
        version: &str,
        payload: serde_json::Value,
    ) -> Result<ResultRecord, StoreError> {
        let record = ResultRecord {
            id: ResultId::new(),
            run_id,
            result_type: result_type.to_string(),
            version: version.to_string(),
            payload,
            created_at: Utc::now(),
        };
        self.records
            .write()
            .map_err(|_| poisoned())?
            .push(record.clone());
        Ok(record)
    }

    async fn get_by_run(&self, run_id: RunId) -> Result<Vec<ResultRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .iter()
            .filter(|record| record.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[tokio::test]
    async fn run_lifecycle_is_forward_only() {
        let store = InMemoryRunStore::new();
        let run = store
            .create_run(DocumentId::new(), "echo", "v1", CorrelationId::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);

        store.mark_run_succeeded(run.id).await.unwrap();
        let err = store.mark_run_failed(run.id, "late").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert!(stored.finished_at.is_some());
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn failed_step_keeps_diagnostics_and_rejects_success() {
        let store = InMemoryRunStore::new();
        let run = store
            .create_run(DocumentId::new(), "echo", "v1", CorrelationId::new())
            .await
            .unwrap();
        let step = store.create_step_run(run.id, "echo").await.unwrap();

        store.mark_step_failed(step.id, "boom").await.unwrap();
        assert!(store.mark_step_succeeded(step.id).await.is_err());

        let steps = store.step_runs(run.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[0].diagnostics.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn step_run_requires_existing_run() {
        let store = InMemoryRunStore::new();
        let err = store.create_step_run(RunId::new(), "echo").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn runs_for_document_are_newest_first() {
        let store = InMemoryRunStore::new();
        let document_id = DocumentId::new();
        let first = store
            .create_run(document_id, "echo", "v1", CorrelationId::new())
            .await
            .unwrap();
        let second = store
            .create_run(document_id, "echo", "v1", CorrelationId::new())
            .await
            .unwrap();
        store
            .create_run(DocumentId::new(), "echo", "v1", CorrelationId::new())
            .await
            .unwrap();

        let runs = store.runs_for_document(document_id).await.unwrap();
        assert_eq!(
            runs.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
    }

    #[tokio::test]
    async fn latest_in_run_prefers_the_newest_match() {
        let store = InMemoryResultStore::new();
        let run_id = RunId::new();
        store.save(run_id, "DocText", "v1", json!({ "n": 1 })).await.unwrap();
        store.save(run_id, "DocText", "v2", json!({ "n": 2 })).await.unwrap();
        store.save(RunId::new(), "DocText", "v1", json!({ "n": 3 })).await.unwrap();

        let latest = store.latest_in_run(run_id, "doctext", None).await.unwrap().unwrap();
        assert_eq!(latest.payload["n"], 2);
        let v1 = store
            .latest_in_run(run_id, "DOCTEXT", Some("V1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v1.payload["n"], 1);
        assert!(store.latest_in_run(run_id, "Other", None).await.unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn saves_are_never_lost_or_rewritten(types in prop::collection::vec("[A-C]", 1..30)) {
            let store = InMemoryResultStore::new();
            let run_id = RunId::new();
            let mut saved = Vec::new();
            for (index, result_type) in types.iter().enumerate() {
                let record = block_on(store.save(run_id, result_type, "v1", json!({ "i": index })))
                    .unwrap();
                saved.push(record);

                let listed = block_on(store.get_by_run(run_id)).unwrap();
                prop_assert_eq!(&listed, &saved);
            }
        }
    }
}
