//! PostgreSQL sync store
//!
//! Counter updates are single `UPDATE ... SET x = x + $n` statements so concurrent
//! batch workers never lose increments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grimoire_common::SyncType;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{SyncFilter, SyncStore};
use crate::features::shared::error_helpers::map_unique_violation;
use crate::ingest::models::{DownloadStatus, FailureEntry, ProcessingStatus, SyncRecord};
use crate::ingest::{Result, SyncError};

const COLUMNS: &str = "id, sync_type, status, version, download_uri, file_path, file_size, \
     started_at, completed_at, cancelled_at, error_message, processing_status, total_records, \
     processed_records, imported_records, last_processed_batch, batch_size, failed_batches, \
     processing_started_at, processing_completed_at, failure_log, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SyncRecordRow {
    id: Uuid,
    sync_type: String,
    status: String,
    version: Option<String>,
    download_uri: Option<String>,
    file_path: Option<String>,
    file_size: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    processing_status: Option<String>,
    total_records: Option<i64>,
    processed_records: i64,
    imported_records: i64,
    last_processed_batch: i64,
    batch_size: Option<i64>,
    failed_batches: i64,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
    failure_log: Json<Vec<FailureEntry>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SyncRecordRow> for SyncRecord {
    type Error = SyncError;

    fn try_from(row: SyncRecordRow) -> Result<Self> {
        let sync_type: SyncType = row.sync_type.parse()?;
        let status: DownloadStatus = row.status.parse().map_err(SyncError::Validation)?;
        let processing_status = row
            .processing_status
            .map(|s| s.parse::<ProcessingStatus>())
            .transpose()
            .map_err(SyncError::Validation)?;

        Ok(SyncRecord {
            id: row.id,
            sync_type,
            status,
            version: row.version,
            download_uri: row.download_uri,
            file_path: row.file_path,
            file_size: row.file_size,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            error_message: row.error_message,
            processing_status,
            total_records: row.total_records,
            processed_records: row.processed_records,
            imported_records: row.imported_records,
            last_processed_batch: row.last_processed_batch,
            batch_size: row.batch_size,
            failed_batches: row.failed_batches,
            processing_started_at: row.processing_started_at,
            processing_completed_at: row.processing_completed_at,
            failure_log: row.failure_log.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgSyncStore {
    pool: PgPool,
}

impl PgSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_where(
        &self,
        clause: &str,
        sync_type: SyncType,
        exclude: Option<Uuid>,
    ) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_records \
             WHERE sync_type = $1 AND ($2::uuid IS NULL OR id <> $2) AND {clause}"
        );
        let rows: Vec<SyncRecordRow> = sqlx::query_as(&sql)
            .bind(sync_type.as_str())
            .bind(exclude)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SyncRecord::try_from).collect()
    }
}

/// State columns written by `save_state`; counters are never part of it
const STATE_UPDATE: &str = "UPDATE sync_records SET status = $2, version = $3, \
     download_uri = $4, file_path = $5, file_size = $6, started_at = $7, completed_at = $8, \
     cancelled_at = $9, error_message = $10, processing_status = $11, total_records = $12, \
     batch_size = $13, processing_started_at = $14, processing_completed_at = $15, \
     updated_at = NOW()";

fn bind_state<'q>(
    query: Query<'q, Postgres, PgArguments>,
    record: &'q SyncRecord,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(&record.version)
        .bind(&record.download_uri)
        .bind(&record.file_path)
        .bind(record.file_size)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.cancelled_at)
        .bind(&record.error_message)
        .bind(record.processing_status.map(|s| s.as_str()))
        .bind(record.total_records)
        .bind(record.batch_size)
        .bind(record.processing_started_at)
        .bind(record.processing_completed_at)
}

fn expect_row(id: Uuid, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(SyncError::NotFound(id))
    } else {
        Ok(())
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &SyncFilter) {
    if let Some(sync_type) = filter.sync_type {
        qb.push(" AND sync_type = ").push_bind(sync_type.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn insert(&self, record: &SyncRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO sync_records ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20, $21, $22, $23)"
        );

        sqlx::query(&sql)
            .bind(record.id)
            .bind(record.sync_type.as_str())
            .bind(record.status.as_str())
            .bind(&record.version)
            .bind(&record.download_uri)
            .bind(&record.file_path)
            .bind(record.file_size)
            .bind(record.started_at)
            .bind(record.completed_at)
            .bind(record.cancelled_at)
            .bind(&record.error_message)
            .bind(record.processing_status.map(|s| s.as_str()))
            .bind(record.total_records)
            .bind(record.processed_records)
            .bind(record.imported_records)
            .bind(record.last_processed_batch)
            .bind(record.batch_size)
            .bind(record.failed_batches)
            .bind(record.processing_started_at)
            .bind(record.processing_completed_at)
            .bind(Json(&record.failure_log))
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                // Only the active-per-type index can reject a new active record
                if record.is_active() {
                    map_unique_violation(
                        e,
                        SyncError::AlreadyActive(record.sync_type),
                        SyncError::Database,
                    )
                } else {
                    SyncError::Database(e)
                }
            })?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM sync_records WHERE id = $1");
        let row: Option<SyncRecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SyncRecord::try_from).transpose()
    }

    async fn save_state(&self, record: &SyncRecord) -> Result<()> {
        let sql = format!("{STATE_UPDATE} WHERE id = $1");
        let result = bind_state(sqlx::query(&sql), record)
            .execute(&self.pool)
            .await?;

        expect_row(record.id, result.rows_affected())
    }

    async fn save_state_if(&self, record: &SyncRecord, expected: DownloadStatus) -> Result<bool> {
        let sql = format!("{STATE_UPDATE} WHERE id = $1 AND status = $16");
        let result = bind_state(sqlx::query(&sql), record)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get(record.id).await? {
            Some(_) => Ok(false),
            None => Err(SyncError::NotFound(record.id)),
        }
    }

    async fn reset_progress(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                processed_records = 0,
                imported_records = 0,
                last_processed_batch = 0,
                failed_batches = 0,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        expect_row(id, result.rows_affected())
    }

    async fn record_dispatch(&self, id: Uuid, batch_number: i64, records: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                processed_records = processed_records + $2,
                last_processed_batch = GREATEST(last_processed_batch, $3),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(records)
        .bind(batch_number)
        .execute(&self.pool)
        .await?;

        expect_row(id, result.rows_affected())
    }

    async fn record_imported(&self, id: Uuid, records: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_records SET imported_records = imported_records + $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(records)
        .execute(&self.pool)
        .await?;

        expect_row(id, result.rows_affected())
    }

    async fn record_batch_failure(&self, id: Uuid, entry: FailureEntry) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                failed_batches = failed_batches + 1,
                failure_log = failure_log || jsonb_build_array($2::jsonb),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(&entry))
        .execute(&self.pool)
        .await?;

        expect_row(id, result.rows_affected())
    }

    async fn append_failure(&self, id: Uuid, entry: FailureEntry) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_records SET failure_log = failure_log || jsonb_build_array($2::jsonb), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Json(&entry))
        .execute(&self.pool)
        .await?;

        expect_row(id, result.rows_affected())
    }

    async fn clear_failures(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_records SET failure_log = '[]'::jsonb, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest_completed(
        &self,
        sync_type: SyncType,
        exclude: Option<Uuid>,
    ) -> Result<Option<SyncRecord>> {
        let mut records = self
            .fetch_where(
                "status = 'completed' ORDER BY completed_at DESC NULLS LAST, created_at DESC LIMIT 1",
                sync_type,
                exclude,
            )
            .await?;
        Ok(records.pop())
    }

    async fn find_active(&self, sync_type: SyncType) -> Result<Option<SyncRecord>> {
        let mut records = self
            .fetch_where(
                "status IN ('pending', 'downloading') ORDER BY created_at DESC LIMIT 1",
                sync_type,
                None,
            )
            .await?;
        Ok(records.pop())
    }

    async fn list(&self, filter: &SyncFilter) -> Result<(Vec<SyncRecord>, i64)> {
        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM sync_records WHERE 1 = 1");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM sync_records WHERE 1 = 1"));
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit.max(0))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        let rows: Vec<SyncRecordRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let records = rows
            .into_iter()
            .map(SyncRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok((records, total))
    }

    async fn completed_with_files(&self, sync_type: SyncType) -> Result<Vec<SyncRecord>> {
        self.fetch_where(
            "status = 'completed' AND file_path IS NOT NULL ORDER BY completed_at",
            sync_type,
            None,
        )
        .await
    }

    async fn clear_file_path(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE sync_records SET file_path = NULL, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;

        expect_row(id, result.rows_affected())
    }

    async fn interrupted(&self) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_records \
             WHERE status IN ('pending', 'downloading') \
             OR (status = 'completed' AND processing_status IN ('queued', 'processing')) \
             ORDER BY created_at"
        );
        let rows: Vec<SyncRecordRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(SyncRecord::try_from).collect()
    }
}
