//! SQLite campaign store.
//!
//! Batches and messages live in two tables; the planner's insert and the
//! scheduler's group claim run inside transactions, and every per-message
//! transition is a single guarded UPDATE keyed by id and current status.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sw_common::{Batch, BatchStatus, FailureKind, Message, MessageStatus, PacingConfig};
use tracing::{debug, info};

use crate::{CampaignStore, DashboardCounts, Progress, ResumableCounts};

pub struct SqliteCampaignStore {
    pool: SqlitePool,
}

impl SqliteCampaignStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                template_id TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                batch_size INTEGER NOT NULL,
                delay_seconds REAL NOT NULL,
                total_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL REFERENCES batches(id),
                customer_id TEXT NOT NULL,
                phone TEXT NOT NULL,
                body TEXT NOT NULL,
                seq INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                error_kind TEXT,
                last_error TEXT,
                sent_at INTEGER,
                UNIQUE(batch_id, customer_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_batch_status ON messages(batch_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_messages_batch_seq ON messages(batch_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_batches_status ON batches(status)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Initialized SQLite campaign schema");
        Ok(())
    }

    fn build_in_clause(count: usize) -> String {
        let placeholders: Vec<&str> = (0..count).map(|_| "?").collect();
        placeholders.join(", ")
    }

    fn parse_batch(row: &sqlx::sqlite::SqliteRow) -> Result<Batch> {
        let status: String = row.get("status");
        let status = BatchStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("invalid batch status '{}'", status))?;
        let created_at: i64 = row.get("created_at");
        let updated_at: i64 = row.get("updated_at");
        Ok(Batch {
            id: row.get("id"),
            template_id: row.get("template_id"),
            requested_by: row.get("requested_by"),
            pacing: PacingConfig {
                batch_size: row.get::<i64, _>("batch_size") as u32,
                delay_seconds: row.get("delay_seconds"),
            },
            total_count: row.get::<i64, _>("total_count") as u32,
            status,
            created_at: millis_to_datetime(created_at)?,
            updated_at: millis_to_datetime(updated_at)?,
        })
    }

    fn parse_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
        let status: String = row.get("status");
        let status = MessageStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("invalid message status '{}'", status))?;
        let error_kind: Option<String> = row.get("error_kind");
        let error_kind = match error_kind {
            Some(k) => Some(
                FailureKind::parse(&k)
                    .ok_or_else(|| anyhow::anyhow!("invalid failure kind '{}'", k))?,
            ),
            None => None,
        };
        let sent_at: Option<i64> = row.get("sent_at");
        Ok(Message {
            id: row.get("id"),
            batch_id: row.get("batch_id"),
            customer_id: row.get("customer_id"),
            phone: row.get("phone"),
            body: row.get("body"),
            seq: row.get::<i64, _>("seq") as u32,
            status,
            attempt_count: row.get::<i64, _>("attempt_count") as u32,
            error_kind,
            last_error: row.get("last_error"),
            sent_at: sent_at.map(millis_to_datetime).transpose()?,
        })
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("invalid timestamp {ms}"))
}

const MESSAGE_COLUMNS: &str = "id, batch_id, customer_id, phone, body, seq, status, \
     attempt_count, error_kind, last_error, sent_at";

#[async_trait]
impl CampaignStore for SqliteCampaignStore {
    async fn insert_batch(&self, batch: &Batch, messages: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO batches (id, template_id, requested_by, batch_size, delay_seconds, \
             total_count, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&batch.id)
        .bind(&batch.template_id)
        .bind(&batch.requested_by)
        .bind(batch.pacing.batch_size as i64)
        .bind(batch.pacing.delay_seconds)
        .bind(batch.total_count as i64)
        .bind(batch.status.as_str())
        .bind(batch.created_at.timestamp_millis())
        .bind(batch.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for msg in messages {
            sqlx::query(
                "INSERT INTO messages (id, batch_id, customer_id, phone, body, seq, status, \
                 attempt_count, error_kind, last_error, sent_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&msg.id)
            .bind(&msg.batch_id)
            .bind(&msg.customer_id)
            .bind(&msg.phone)
            .bind(&msg.body)
            .bind(msg.seq as i64)
            .bind(msg.status.as_str())
            .bind(msg.attempt_count as i64)
            .bind(msg.error_kind.map(|k| k.as_str()))
            .bind(&msg.last_error)
            .bind(msg.sent_at.map(|t| t.timestamp_millis()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(batch_id = %batch.id, messages = messages.len(), "Persisted batch");
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_batch).transpose()
    }

    async fn list_batches(&self) -> Result<Vec<Batch>> {
        let rows = sqlx::query("SELECT * FROM batches ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_batch).collect()
    }

    async fn claimable_batches(&self) -> Result<Vec<Batch>> {
        let rows = sqlx::query(
            "SELECT * FROM batches WHERE status IN ('scheduled', 'running') \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_batch).collect()
    }

    async fn set_batch_status(&self, batch_id: &str, status: BatchStatus) -> Result<()> {
        let result = sqlx::query("UPDATE batches SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("batch {} not found", batch_id);
        }
        Ok(())
    }

    async fn claim_pending(&self, batch_id: &str, limit: u32) -> Result<Vec<Message>> {
        let mut tx = self.pool.begin().await?;

        let id_rows = sqlx::query(
            "SELECT id FROM messages WHERE batch_id = ? AND status = 'pending' \
             ORDER BY seq ASC LIMIT ?",
        )
        .bind(batch_id)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if id_rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<String> = id_rows.iter().map(|r| r.get("id")).collect();
        let in_clause = Self::build_in_clause(ids.len());

        // The status guard keeps the claim exclusive even if another claimer
        // raced us between the SELECT and this UPDATE.
        let update = format!(
            "UPDATE messages SET status = 'sending', attempt_count = attempt_count + 1 \
             WHERE id IN ({in_clause}) AND status = 'pending'"
        );
        let mut q = sqlx::query(&update);
        for id in &ids {
            q = q.bind(id);
        }
        q.execute(&mut *tx).await?;

        let select = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE id IN ({in_clause}) AND status = 'sending' ORDER BY seq ASC"
        );
        let mut q = sqlx::query(&select);
        for id in &ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&mut *tx).await?;

        tx.commit().await?;

        let claimed: Result<Vec<Message>> = rows.iter().map(Self::parse_message).collect();
        let claimed = claimed?;
        debug!(batch_id, count = claimed.len(), "Claimed pending messages");
        Ok(claimed)
    }

    async fn mark_sent(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'sent', sent_at = ?, error_kind = NULL, \
             last_error = NULL WHERE id = ? AND status = 'sending'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, message_id: &str, kind: FailureKind, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'failed', error_kind = ?, last_error = ? \
             WHERE id = ? AND status = 'sending'",
        )
        .bind(kind.as_str())
        .bind(error)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn return_for_retry(&self, message_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'pending', error_kind = 'transient', last_error = ? \
             WHERE id = ? AND status = 'sending'",
        )
        .bind(error)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn messages(&self, batch_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE batch_id = ? ORDER BY seq ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_message).collect()
    }

    async fn progress(&self, batch_id: &str) -> Result<Progress> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM messages WHERE batch_id = ? GROUP BY status",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut progress = Progress::default();
        for row in &rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            let n = n as u64;
            progress.total += n;
            match MessageStatus::parse(&status) {
                Some(MessageStatus::Sent) => progress.sent += n,
                Some(MessageStatus::Failed) => progress.failed += n,
                Some(MessageStatus::Skipped) => progress.skipped += n,
                Some(MessageStatus::Pending) | Some(MessageStatus::Sending) => {
                    progress.pending += n
                }
                None => anyhow::bail!("invalid message status '{}'", status),
            }
        }
        Ok(progress)
    }

    async fn resumable_counts(&self, batch_id: &str) -> Result<ResumableCounts> {
        let row = sqlx::query(
            "SELECT \
             SUM(CASE WHEN status = 'sending' THEN 1 ELSE 0 END) AS sending, \
             SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending, \
             SUM(CASE WHEN status = 'failed' AND error_kind = 'transient' THEN 1 ELSE 0 END) \
                 AS transient_failed \
             FROM messages WHERE batch_id = ?",
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ResumableCounts {
            sending: row.get::<Option<i64>, _>("sending").unwrap_or(0) as u64,
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0) as u64,
            transient_failed: row.get::<Option<i64>, _>("transient_failed").unwrap_or(0) as u64,
        })
    }

    async fn reset_sending(&self, batch_id: Option<&str>) -> Result<u64> {
        let result = match batch_id {
            Some(id) => {
                sqlx::query(
                    "UPDATE messages SET status = 'pending' \
                     WHERE batch_id = ? AND status = 'sending'",
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE messages SET status = 'pending' WHERE status = 'sending'")
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn reset_running_batches(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE batches SET status = 'scheduled', updated_at = ? WHERE status = 'running'",
        )
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_transient_failures(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'pending', attempt_count = 0 \
             WHERE batch_id = ? AND status = 'failed' AND error_kind = 'transient'",
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn dashboard_counts(&self) -> Result<DashboardCounts> {
        let row = sqlx::query(
            "SELECT \
             (SELECT COUNT(*) FROM messages WHERE status = 'sent') AS sent, \
             (SELECT COUNT(*) FROM messages WHERE status = 'failed') AS failed, \
             (SELECT COUNT(*) FROM batches WHERE status IN ('scheduled', 'running')) AS active",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardCounts {
            messages_sent: row.get::<i64, _>("sent") as u64,
            messages_failed: row.get::<i64, _>("failed") as u64,
            active_batches: row.get::<i64, _>("active") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteCampaignStore {
        // A single connection keeps the in-memory database shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteCampaignStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn seed(count: u32) -> (Batch, Vec<Message>) {
        let batch = Batch::new(
            "tpl-1",
            "operator-1",
            PacingConfig { batch_size: 2, delay_seconds: 0.0 },
            count,
        );
        let messages = (0..count)
            .map(|i| {
                Message::pending(
                    &batch.id,
                    format!("cust-{i}"),
                    format!("+1555000{i:04}"),
                    format!("hello {i}"),
                    i,
                )
            })
            .collect();
        (batch, messages)
    }

    #[tokio::test]
    async fn round_trips_batch_and_messages() {
        let store = test_store().await;
        let (batch, messages) = seed(3);
        store.insert_batch(&batch, &messages).await.unwrap();

        let loaded = store.get_batch(&batch.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_count, 3);
        assert_eq!(loaded.status, BatchStatus::Scheduled);
        assert_eq!(loaded.pacing.batch_size, 2);

        let msgs = store.messages(&batch.id).await.unwrap();
        assert_eq!(msgs.len(), 3);
        assert!(msgs.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn claim_marks_sending_and_counts_attempt() {
        let store = test_store().await;
        let (batch, messages) = seed(5);
        store.insert_batch(&batch, &messages).await.unwrap();

        let claimed = store.claim_pending(&batch.id, 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|m| m.status == MessageStatus::Sending));
        assert!(claimed.iter().all(|m| m.attempt_count == 1));

        // The same messages are never handed out twice.
        let next = store.claim_pending(&batch.id, 10).await.unwrap();
        assert_eq!(next.len(), 3);
        for m in &claimed {
            assert!(next.iter().all(|n| n.id != m.id));
        }
    }

    #[tokio::test]
    async fn duplicate_customer_rolls_back_whole_insert() {
        let store = test_store().await;
        let (batch, mut messages) = seed(3);
        messages[2].customer_id = messages[0].customer_id.clone();

        assert!(store.insert_batch(&batch, &messages).await.is_err());
        assert!(store.get_batch(&batch.id).await.unwrap().is_none());
        assert!(store.messages(&batch.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovery_resets_sending_and_running() {
        let store = test_store().await;
        let (batch, messages) = seed(2);
        store.insert_batch(&batch, &messages).await.unwrap();
        store.set_batch_status(&batch.id, BatchStatus::Running).await.unwrap();
        let claimed = store.claim_pending(&batch.id, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);

        assert_eq!(store.reset_sending(None).await.unwrap(), 1);
        assert_eq!(store.reset_running_batches().await.unwrap(), 1);

        let p = store.progress(&batch.id).await.unwrap();
        assert_eq!(p.pending, 2);
        let loaded = store.get_batch(&batch.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Scheduled);
    }

    #[tokio::test]
    async fn transient_failures_rearm_but_permanent_do_not() {
        let store = test_store().await;
        let (batch, messages) = seed(2);
        store.insert_batch(&batch, &messages).await.unwrap();

        let claimed = store.claim_pending(&batch.id, 2).await.unwrap();
        store
            .mark_failed(&claimed[0].id, FailureKind::Transient, "timeout")
            .await
            .unwrap();
        store
            .mark_failed(&claimed[1].id, FailureKind::Permanent, "invalid number")
            .await
            .unwrap();

        assert_eq!(store.reset_transient_failures(&batch.id).await.unwrap(), 1);

        let msgs = store.messages(&batch.id).await.unwrap();
        let rearmed = msgs.iter().find(|m| m.id == claimed[0].id).unwrap();
        assert_eq!(rearmed.status, MessageStatus::Pending);
        assert_eq!(rearmed.attempt_count, 0);
        let permanent = msgs.iter().find(|m| m.id == claimed[1].id).unwrap();
        assert_eq!(permanent.status, MessageStatus::Failed);
        assert_eq!(permanent.error_kind, Some(FailureKind::Permanent));
    }
}
