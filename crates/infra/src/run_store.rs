//! Postgres-backed run history and result log.
//!
//! Status changes load the row `FOR UPDATE`, apply the domain transition
//! (which rejects backward moves), and write it back in the same transaction.
//! Results are insert-only; a `BIGSERIAL` `seq` column orders records that
//! share a timestamp.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use docflow_core::{
    CorrelationId, DocumentId, ResultId, ResultRecord, Run, RunId, RunStatus, StepRun, StepRunId,
    StepStatus,
};
use docflow_workflow::{ResultStore, RunStore, StoreError};

use crate::db::{decode_error, map_sqlx_error};

const RUN_COLUMNS: &str = "id, document_id, workflow_name, workflow_version, correlation_id, \
                           status, started_at, finished_at, error";

const STEP_COLUMNS: &str = "id, run_id, step_name, status, started_at, finished_at, diagnostics";

fn store_error(operation: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| map_sqlx_error(operation, e).into()
}

fn run_from_row(row: &PgRow) -> Result<Run, sqlx::Error> {
    Ok(Run {
        id: RunId::from_uuid(row.try_get("id")?),
        document_id: DocumentId::from_uuid(row.try_get("document_id")?),
        workflow_name: row.try_get("workflow_name")?,
        workflow_version: row.try_get("workflow_version")?,
        correlation_id: CorrelationId::from_uuid(row.try_get("correlation_id")?),
        status: RunStatus::from_code(row.try_get("status")?).map_err(decode_error)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
    })
}

fn step_from_row(row: &PgRow) -> Result<StepRun, sqlx::Error> {
    Ok(StepRun {
        id: StepRunId::from_uuid(row.try_get("id")?),
        run_id: RunId::from_uuid(row.try_get("run_id")?),
        step_name: row.try_get("step_name")?,
        status: StepStatus::from_code(row.try_get("status")?).map_err(decode_error)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        diagnostics: row.try_get("diagnostics")?,
    })
}

fn result_from_row(row: &PgRow) -> Result<ResultRecord, sqlx::Error> {
    let payload: Json<serde_json::Value> = row.try_get("payload")?;
    Ok(ResultRecord {
        id: ResultId::from_uuid(row.try_get("id")?),
        run_id: RunId::from_uuid(row.try_get("run_id")?),
        result_type: row.try_get("result_type")?,
        version: row.try_get("version")?,
        payload: payload.0,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresRunStore {
    pool: Arc<PgPool>,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn transition_run(
        &self,
        run_id: RunId,
        next: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error("begin"))?;

        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1 FOR UPDATE"))
            .bind(run_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error("load_run"))?
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
        let mut run = run_from_row(&row).map_err(store_error("load_run"))?;
        run.transition(next, Utc::now(), error)?;

        sqlx::query("UPDATE runs SET status = $2, finished_at = $3, error = $4 WHERE id = $1")
            .bind(run_id.as_uuid())
            .bind(run.status.code())
            .bind(run.finished_at)
            .bind(&run.error)
            .execute(&mut *tx)
            .await
            .map_err(store_error("update_run"))?;

        tx.commit().await.map_err(store_error("commit"))
    }

    async fn transition_step(
        &self,
        step_run_id: StepRunId,
        next: StepStatus,
        diagnostics: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error("begin"))?;

        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM step_runs WHERE id = $1 FOR UPDATE"
        ))
        .bind(step_run_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error("load_step_run"))?
        .ok_or_else(|| StoreError::NotFound(format!("step run {step_run_id}")))?;
        let mut step = step_from_row(&row).map_err(store_error("load_step_run"))?;
        step.transition(next, Utc::now(), diagnostics)?;

        sqlx::query(
            "UPDATE step_runs SET status = $2, finished_at = $3, diagnostics = $4 WHERE id = $1",
        )
        .bind(step_run_id.as_uuid())
        .bind(step.status.code())
        .bind(step.finished_at)
        .bind(&step.diagnostics)
        .execute(&mut *tx)
        .await
        .map_err(store_error("update_step_run"))?;

        tx.commit().await.map_err(store_error("commit"))
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self), fields(document_id = %document_id), err)]
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
        sqlx::query(
            r#"
            INSERT INTO runs (id, document_id, workflow_name, workflow_version, correlation_id,
                              status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(document_id.as_uuid())
        .bind(&run.workflow_name)
        .bind(&run.workflow_version)
        .bind(correlation_id.as_uuid())
        .bind(run.status.code())
        .bind(run.started_at)
        .execute(&*self.pool)
        .await
        .map_err(store_error("create_run"))?;
        Ok(run)
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn mark_run_succeeded(&self, run_id: RunId) -> Result<(), StoreError> {
        self.transition_run(run_id, RunStatus::Succeeded, None).await
    }

    #[instrument(skip(self, error), fields(run_id = %run_id), err)]
    async fn mark_run_failed(&self, run_id: RunId, error: &str) -> Result<(), StoreError> {
        self.transition_run(run_id, RunStatus::Failed, Some(error.to_string()))
            .await
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn create_step_run(&self, run_id: RunId, step_name: &str) -> Result<StepRun, StoreError> {
        let step = StepRun {
            id: StepRunId::new(),
            run_id,
            step_name: step_name.to_string(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            diagnostics: None,
        };
        let inserted = sqlx::query(
            r#"
            INSERT INTO step_runs (id, run_id, step_name, status, started_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(step.id.as_uuid())
        .bind(run_id.as_uuid())
        .bind(&step.step_name)
        .bind(step.status.code())
        .bind(step.started_at)
        .execute(&*self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(step),
            Err(e) => match map_sqlx_error("create_step_run", e) {
                crate::db::DbError::Reference { .. } => {
                    Err(StoreError::NotFound(format!("run {run_id}")))
                }
                other => Err(other.into()),
            },
        }
    }

    #[instrument(skip(self), fields(step_run_id = %step_run_id), err)]
    async fn mark_step_succeeded(&self, step_run_id: StepRunId) -> Result<(), StoreError> {
        self.transition_step(step_run_id, StepStatus::Succeeded, None)
            .await
    }

    #[instrument(skip(self, diagnostics), fields(step_run_id = %step_run_id), err)]
    async fn mark_step_failed(
        &self,
        step_run_id: StepRunId,
        diagnostics: &str,
    ) -> Result<(), StoreError> {
        self.transition_step(step_run_id, StepStatus::Failed, Some(diagnostics.to_string()))
            .await
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(run_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(store_error("get_run"))?;
        row.as_ref()
            .map(run_from_row)
            .transpose()
            .map_err(store_error("get_run"))
    }

    #[instrument(skip(self), fields(document_id = %document_id), err)]
    async fn runs_for_document(&self, document_id: DocumentId) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE document_id = $1 \
             ORDER BY started_at DESC, id DESC"
        ))
        .bind(document_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(store_error("runs_for_document"))?;
        rows.iter()
            .map(run_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error("runs_for_document"))
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn step_runs(&self, run_id: RunId) -> Result<Vec<StepRun>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM step_runs WHERE run_id = $1 ORDER BY seq ASC"
        ))
        .bind(run_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(store_error("step_runs"))?;
        rows.iter()
            .map(step_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error("step_runs"))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: Arc<PgPool>,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    #[instrument(skip(self, payload), fields(run_id = %run_id), err)]
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
        sqlx::query(
            r#"
            INSERT INTO results (id, run_id, result_type, version, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(run_id.as_uuid())
        .bind(&record.result_type)
        .bind(&record.version)
        .bind(Json(&record.payload))
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(store_error("save_result"))?;
        Ok(record)
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn get_by_run(&self, run_id: RunId) -> Result<Vec<ResultRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, result_type, version, payload, created_at
            FROM results
            WHERE run_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(store_error("get_results"))?;
        rows.iter()
            .map(result_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error("get_results"))
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn latest_in_run(
        &self,
        run_id: RunId,
        result_type: &str,
        version: Option<&str>,
    ) -> Result<Option<ResultRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, run_id, result_type, version, payload, created_at
            FROM results
            WHERE run_id = $1
              AND lower(result_type) = lower($2)
              AND ($3::text IS NULL OR lower(version) = lower($3::text))
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(result_type)
        .bind(version)
        .fetch_optional(&*self.pool)
        .await
        .map_err(store_error("latest_result_in_run"))?;
        row.as_ref()
            .map(result_from_row)
            .transpose()
            .map_err(store_error("latest_result_in_run"))
    }
}
