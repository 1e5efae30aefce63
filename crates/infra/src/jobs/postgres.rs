//! Postgres-backed job queue.
//!
//! Leasing is a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)`
//! so concurrent workers never block on, or double-lease, the same row. All
//! time comparisons use the database clock (`now()`), never the worker's.
//!
//! Acknowledgements are conditional on `status = Leased` and on the attempt
//! number of the presented lease. When no row is updated, a follow-up read
//! tells `NotFound`, `NotLeased` and `LeaseLost` apart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};

use docflow_core::{
    DocumentId, EnqueueRequest, Job, JobId, JobParams, JobStatus, Lease, LeasedJob,
};

use super::{DEFAULT_MAX_ATTEMPTS, JobQueue, MAX_ATTEMPTS_EXCEEDED, QueueError};
use crate::db::{decode_error, map_sqlx_error, millis};

const JOB_COLUMNS: &str = "id, document_id, workflow_name, workflow_version, status, attempts, \
                           next_run_at, last_error, params, created_at, finished_at";

#[derive(Debug, Clone)]
pub struct PostgresJobQueue {
    pool: Arc<PgPool>,
    max_attempts: Option<u32>,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn max_attempts_param(&self) -> Option<i32> {
        self.max_attempts
            .map(|max| i32::try_from(max).unwrap_or(i32::MAX))
    }

    /// Fail every due job that already used up its attempts.
    async fn fail_exhausted(&self, max_attempts: i32) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 3,
                finished_at = now(),
                last_error = CASE
                    WHEN last_error IS NULL OR last_error = '' THEN $2
                    ELSE last_error || '; ' || $2
                END
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status IN (0, 1) AND next_run_at <= now() AND attempts >= $1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(max_attempts)
        .bind(MAX_ATTEMPTS_EXCEEDED)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail_exhausted", e))?;
        Ok(result.rows_affected())
    }

    /// Explain why a conditional acknowledgement touched no row.
    async fn not_acknowledged(&self, lease: Lease) -> QueueError {
        let job_id = lease.job_id;
        let row = sqlx::query("SELECT status, attempts FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await;
        let row = match row {
            Ok(Some(row)) => row,
            Ok(None) => return QueueError::NotFound(job_id),
            Err(e) => return map_sqlx_error("acknowledge", e).into(),
        };
        let decoded = row
            .try_get::<i16, _>("status")
            .and_then(|code| JobStatus::from_code(code).map_err(decode_error))
            .and_then(|status| Ok((status, row.try_get::<i32, _>("attempts")?)));
        match decoded {
            Ok((JobStatus::Leased, attempts)) => QueueError::LeaseLost {
                job_id,
                attempt: lease.attempt,
                current: attempts.max(0) as u32,
            },
            Ok((status, _)) => QueueError::NotLeased { job_id, status },
            Err(e) => map_sqlx_error("acknowledge", e).into(),
        }
    }

    fn attempt_param(lease: Lease) -> i32 {
        i32::try_from(lease.attempt).unwrap_or(i32::MAX)
    }
}

fn lease_from_row(row: &PgRow) -> Result<LeasedJob, sqlx::Error> {
    let attempts: i32 = row.try_get("attempts")?;
    let params: Json<JobParams> = row.try_get("params")?;
    Ok(LeasedJob {
        job_id: JobId::from_uuid(row.try_get("id")?),
        document_id: DocumentId::from_uuid(row.try_get("document_id")?),
        workflow_name: row.try_get("workflow_name")?,
        workflow_version: row.try_get("workflow_version")?,
        attempts: attempts.max(0) as u32,
        params: params.0,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status = JobStatus::from_code(row.try_get("status")?).map_err(decode_error)?;
    let attempts: i32 = row.try_get("attempts")?;
    let params: Json<JobParams> = row.try_get("params")?;
    Ok(Job {
        id: JobId::from_uuid(row.try_get("id")?),
        document_id: DocumentId::from_uuid(row.try_get("document_id")?),
        workflow_name: row.try_get("workflow_name")?,
        workflow_version: row.try_get("workflow_version")?,
        status,
        attempts: attempts.max(0) as u32,
        next_run_at: row.try_get("next_run_at")?,
        last_error: row.try_get("last_error")?,
        params: params.0,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[instrument(skip(self, request), fields(document_id = %request.document_id, workflow = %request.workflow_name), err)]
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError> {
        let id = JobId::new();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, document_id, workflow_name, workflow_version, status,
                              attempts, next_run_at, params, created_at)
            VALUES ($1, $2, $3, $4, 0, 0, now(), $5, now())
            "#,
        )
        .bind(id.as_uuid())
        .bind(request.document_id.as_uuid())
        .bind(&request.workflow_name)
        .bind(&request.workflow_version)
        .bind(Json(&request.params))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;
        Ok(id)
    }

    #[instrument(skip(self), err)]
    async fn try_lease(&self, lease: Duration) -> Result<Option<LeasedJob>, QueueError> {
        let max_attempts = self.max_attempts_param();
        if let Some(max) = max_attempts {
            let failed = self.fail_exhausted(max).await?;
            if failed > 0 {
                warn!(failed, "failed jobs that exhausted their attempts");
            }
        }

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 1,
                attempts = attempts + 1,
                next_run_at = now() + ($1::bigint * interval '1 millisecond')
            WHERE id = (
                SELECT id FROM jobs
                WHERE status IN (0, 1)
                  AND next_run_at <= now()
                  AND ($2::int IS NULL OR attempts < $2::int)
                ORDER BY next_run_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, document_id, workflow_name, workflow_version, attempts, params
            "#,
        )
        .bind(millis(lease))
        .bind(max_attempts)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_lease", e))?;

        row.as_ref()
            .map(lease_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("try_lease", e).into())
    }

    #[instrument(skip(self), fields(job_id = %lease.job_id, attempt = lease.attempt), err)]
    async fn acknowledge_success(&self, lease: Lease) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 2, finished_at = now(), last_error = NULL
            WHERE id = $1 AND status = 1 AND attempts = $2
            "#,
        )
        .bind(lease.job_id.as_uuid())
        .bind(Self::attempt_param(lease))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("acknowledge_success", e))?;

        if result.rows_affected() == 0 {
            return Err(self.not_acknowledged(lease).await);
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(job_id = %lease.job_id, attempt = lease.attempt), err)]
    async fn acknowledge_failure(
        &self,
        lease: Lease,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET last_error = $2,
                status = CASE WHEN $3::bigint IS NULL THEN 3::smallint ELSE 0::smallint END,
                next_run_at = CASE
                    WHEN $3::bigint IS NULL THEN next_run_at
                    ELSE now() + ($3::bigint * interval '1 millisecond')
                END,
                finished_at = CASE WHEN $3::bigint IS NULL THEN now() ELSE NULL END
            WHERE id = $1 AND status = 1 AND attempts = $4
            "#,
        )
        .bind(lease.job_id.as_uuid())
        .bind(error)
        .bind(retry_after.map(millis))
        .bind(Self::attempt_param(lease))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("acknowledge_failure", e))?;

        if result.rows_affected() == 0 {
            return Err(self.not_acknowledged(lease).await);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref()
            .map(job_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("get_job", e).into())
    }

    #[instrument(skip(self), fields(document_id = %document_id), err)]
    async fn latest_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE document_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(document_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_job_for_document", e))?;

        row.as_ref()
            .map(job_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("latest_job_for_document", e).into())
    }
}
