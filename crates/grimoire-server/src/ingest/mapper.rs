//! Record mappers
//!
//! A [`RecordMapper`] turns one raw catalog record into persisted state. Batches run
//! concurrently and out of order, so every write must be an upsert keyed on the
//! record's natural identifier.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

/// Converts raw records into domain state
#[async_trait]
pub trait RecordMapper: Send + Sync {
    /// Runs once per batch before any record is imported
    ///
    /// An error here fails the whole batch.
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn import_oracle_card(&self, record: &Value) -> anyhow::Result<()>;

    async fn import_card_printing(&self, record: &Value) -> anyhow::Result<()>;

    async fn import_ruling(&self, record: &Value) -> anyhow::Result<()>;
}

fn required_str<'a>(record: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("record is missing required field '{}'", key))
}

fn optional_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Stores records in `oracle_cards`, `card_printings` and `card_rulings`
#[derive(Clone)]
pub struct PgRecordMapper {
    pool: PgPool,
}

impl PgRecordMapper {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordMapper for PgRecordMapper {
    async fn prepare(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database unavailable for batch import")?;
        Ok(())
    }

    async fn import_oracle_card(&self, record: &Value) -> anyhow::Result<()> {
        let oracle_id = required_str(record, "oracle_id")?;
        let name = required_str(record, "name")?;

        sqlx::query(
            r#"
            INSERT INTO oracle_cards (oracle_id, name, type_line, data, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (oracle_id) DO UPDATE SET
                name = EXCLUDED.name,
                type_line = EXCLUDED.type_line,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(oracle_id)
        .bind(name)
        .bind(optional_str(record, "type_line"))
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert oracle card {}", oracle_id))?;

        Ok(())
    }

    async fn import_card_printing(&self, record: &Value) -> anyhow::Result<()> {
        let id = required_str(record, "id")?;
        let name = required_str(record, "name")?;

        sqlx::query(
            r#"
            INSERT INTO card_printings
                (id, oracle_id, name, set_code, collector_number, lang, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (id) DO UPDATE SET
                oracle_id = EXCLUDED.oracle_id,
                name = EXCLUDED.name,
                set_code = EXCLUDED.set_code,
                collector_number = EXCLUDED.collector_number,
                lang = EXCLUDED.lang,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(optional_str(record, "oracle_id"))
        .bind(name)
        .bind(optional_str(record, "set"))
        .bind(optional_str(record, "collector_number"))
        .bind(optional_str(record, "lang"))
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert card printing {}", id))?;

        Ok(())
    }

    async fn import_ruling(&self, record: &Value) -> anyhow::Result<()> {
        let oracle_id = required_str(record, "oracle_id")?;
        let published_at = required_str(record, "published_at")?;
        let comment = required_str(record, "comment")?;
        let published_at = chrono::NaiveDate::parse_from_str(published_at, "%Y-%m-%d")
            .with_context(|| format!("invalid published_at '{}'", published_at))?;

        sqlx::query(
            r#"
            INSERT INTO card_rulings
                (oracle_id, published_at, comment_hash, comment, source, data, updated_at)
            VALUES ($1, $2, md5($3), $3, $4, $5, NOW())
            ON CONFLICT (oracle_id, published_at, comment_hash) DO UPDATE SET
                source = EXCLUDED.source,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(oracle_id)
        .bind(published_at)
        .bind(comment)
        .bind(optional_str(record, "source"))
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert ruling for {}", oracle_id))?;

        Ok(())
    }
}
