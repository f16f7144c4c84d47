//! Postgres-backed ledger storage.
//!
//! Stock rows, the movement journal and transfer streams share one database,
//! so [`LedgerBackend::commit`] runs as a single `Transaction`:
//!
//! 1. take a transaction-scoped advisory lock, so commits are serialized and
//!    journal sequence, commit time and commit order agree
//! 2. check every row version and every stream version against its expectation
//! 3. write rows, append movements and append events
//!
//! Any version mismatch rolls the whole change set back with
//! [`StoreError::Conflict`]. A unique violation (`23505`) raised by a writer
//! that bypassed the lock maps to `Conflict` as well.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `InvalidCommit` |
//! | Database (other) | any other | `Unavailable` |
//! | PoolClosed, Io, other | n/a | `Unavailable` |

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::instrument;
use uuid::Uuid;

use branchstock_core::{AggregateId, BranchId, ProductId, UserId};
use branchstock_inventory::{MovementKind, MovementRecord, MovementReference, ReferenceKind, StockEntry, StockKey};

use crate::error::StoreError;
use crate::store::backend::{ChangeSet, CommitReceipt, EntryScope, LedgerBackend, StoredEvent};
use crate::store::query::{MovementFilter, MovementPage, Pagination};

/// Key of the advisory lock held by every commit.
const COMMIT_LOCK: i64 = 0x6272_616e_6368;

/// Tables used by [`PostgresLedgerBackend`]. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_entries (
    branch_id   UUID        NOT NULL,
    product_id  UUID        NOT NULL,
    quantity    BIGINT      NOT NULL,
    min_stock   BIGINT      NOT NULL CHECK (min_stock >= 0),
    updated_at  TIMESTAMPTZ NOT NULL,
    version     BIGINT      NOT NULL CHECK (version > 0),
    PRIMARY KEY (branch_id, product_id)
);

CREATE TABLE IF NOT EXISTS stock_movements (
    sequence        BIGINT      PRIMARY KEY,
    id              UUID        NOT NULL UNIQUE,
    branch_id       UUID        NOT NULL,
    product_id      UUID        NOT NULL,
    kind            TEXT        NOT NULL,
    quantity        BIGINT      NOT NULL CHECK (quantity > 0),
    previous_stock  BIGINT      NOT NULL,
    new_stock       BIGINT      NOT NULL,
    reason          TEXT        NOT NULL,
    reference_kind  TEXT        NOT NULL,
    reference_id    UUID,
    occurred_at     TIMESTAMPTZ NOT NULL,
    user_id         UUID        NOT NULL
);

CREATE INDEX IF NOT EXISTS stock_movements_pair_idx
    ON stock_movements (branch_id, product_id, sequence);
CREATE INDEX IF NOT EXISTS stock_movements_reference_idx
    ON stock_movements (reference_kind, reference_id);

CREATE TABLE IF NOT EXISTS ledger_events (
    position         BIGSERIAL   NOT NULL UNIQUE,
    event_id         UUID        NOT NULL UNIQUE,
    aggregate_id     UUID        NOT NULL,
    aggregate_type   TEXT        NOT NULL,
    sequence_number  BIGINT      NOT NULL CHECK (sequence_number > 0),
    event_type       TEXT        NOT NULL,
    event_version    INTEGER     NOT NULL,
    occurred_at      TIMESTAMPTZ NOT NULL,
    payload          JSONB       NOT NULL,
    PRIMARY KEY (aggregate_id, sequence_number)
);
"#;

/// Postgres ledger backend.
///
/// The [`LedgerBackend`] trait is synchronous; calls are bridged onto the
/// current tokio runtime with `block_in_place`, which needs the multi-threaded
/// scheduler (the one `#[tokio::main]` starts).
#[derive(Debug, Clone)]
pub struct PostgresLedgerBackend {
    pool: Arc<PgPool>,
}

impl PostgresLedgerBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect and make sure the tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let backend = Self::new(pool);
        backend.ensure_schema().await?;
        Ok(backend)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn load_entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT branch_id, product_id, quantity, min_stock, updated_at, version
            FROM stock_entries
            WHERE branch_id = $1 AND product_id = $2
            "#,
        )
        .bind(key.branch_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_entry", e))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_entries(&self, scope: EntryScope) -> Result<Vec<StockEntry>, StoreError> {
        let query = match scope {
            EntryScope::Branch(branch_id) => sqlx::query(
                r#"
                SELECT branch_id, product_id, quantity, min_stock, updated_at, version
                FROM stock_entries
                WHERE branch_id = $1
                ORDER BY product_id
                "#,
            )
            .bind(*branch_id.as_uuid()),
            EntryScope::Product(product_id) => sqlx::query(
                r#"
                SELECT branch_id, product_id, quantity, min_stock, updated_at, version
                FROM stock_entries
                WHERE product_id = $1
                ORDER BY branch_id
                "#,
            )
            .bind(*product_id.as_uuid()),
        };

        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_entries", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let branch = filter.branch_id.map(|b| *b.as_uuid());
        let product = filter.product_id.map(|p| *p.as_uuid());
        let reference_kind = filter.reference.map(|r| r.kind.as_str());
        let reference_id = filter.reference.and_then(|r| r.id).map(|id| *id.as_uuid());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR branch_id = $1)
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::text IS NULL OR (reference_kind = $3 AND reference_id IS NOT DISTINCT FROM $4::uuid))
            "#,
        )
        .bind(branch)
        .bind(product)
        .bind(reference_kind)
        .bind(reference_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?
        .try_get("total")
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query(
            r#"
            SELECT sequence, id, branch_id, product_id, kind, quantity, previous_stock, new_stock,
                   reason, reference_kind, reference_id, occurred_at, user_id
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR branch_id = $1)
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::text IS NULL OR (reference_kind = $3 AND reference_id IS NOT DISTINCT FROM $4::uuid))
            ORDER BY sequence DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(branch)
        .bind(product)
        .bind(reference_kind)
        .bind(reference_id)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let records = rows.iter().map(movement_from_row).collect::<Result<Vec<_>, _>>()?;
        let total = total.max(0) as u64;
        let has_more = u64::from(pagination.offset) + (records.len() as u64) < total;

        Ok(MovementPage {
            records,
            total,
            pagination,
            has_more,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn load_movement_history(&self, key: StockKey) -> Result<Vec<MovementRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, id, branch_id, product_id, kind, quantity, previous_stock, new_stock,
                   reason, reference_kind, reference_id, occurred_at, user_id
            FROM stock_movements
            WHERE branch_id = $1 AND product_id = $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(key.branch_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_movement_history", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_events(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, sequence_number, event_type,
                   event_version, occurred_at, payload
            FROM ledger_events
            WHERE aggregate_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_events", e))?;

        rows.iter().map(event_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_id
            FROM ledger_events
            WHERE aggregate_type = $1 AND sequence_number = 1
            ORDER BY position ASC
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream_ids", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("aggregate_id")
                    .map(AggregateId::from_uuid)
                    .map_err(|e| map_sqlx_error("load_stream_ids", e))
            })
            .collect()
    }

    /// Apply a change set atomically; see the module docs for the steps.
    #[instrument(
        skip(self, changes),
        fields(
            entries = changes.entries.len(),
            movements = changes.movements.len(),
            streams = changes.streams.len()
        ),
        err
    )]
    pub async fn apply(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        for s in &changes.streams {
            if let Some((idx, _)) = s.events.iter().enumerate().find(|(_, e)| e.aggregate_id != s.aggregate_id) {
                return Err(StoreError::InvalidCommit(format!(
                    "stream {} batch contains a foreign event at index {idx}",
                    s.aggregate_id
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(COMMIT_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commit_lock", e))?;

        // Verify everything before touching anything.
        let mut entry_versions = Vec::with_capacity(changes.entries.len());
        for w in &changes.entries {
            let key = w.entry.key();
            let current = current_entry_version(&mut tx, key).await?;
            if !w.expected.matches(current) {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::Conflict(format!(
                    "stock row {key}: expected {:?}, found {current}",
                    w.expected
                )));
            }
            entry_versions.push(current);
        }
        let mut stream_versions = Vec::with_capacity(changes.streams.len());
        for s in &changes.streams {
            let current = current_stream_version(&mut tx, s.aggregate_id).await?;
            if !s.expected.matches(current) {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::Conflict(format!(
                    "stream {}: expected {:?}, found {current}",
                    s.aggregate_id, s.expected
                )));
            }
            stream_versions.push(current);
        }

        let (last_sequence, last_commit_at) = journal_head(&mut tx).await?;
        let now = commit_timestamp(Utc::now(), last_commit_at);
        let mut receipt = CommitReceipt::default();

        for (w, current) in changes.entries.into_iter().zip(entry_versions) {
            let mut entry = w.entry;
            entry.version = current + 1;
            entry.updated_at = now;
            write_entry(&mut tx, &entry, current).await?;
            receipt.entries.push(entry);
        }

        let mut sequence = last_sequence;
        for mut record in changes.movements {
            sequence += 1;
            record.sequence = sequence;
            record.occurred_at = now;
            insert_movement(&mut tx, &record).await?;
            receipt.movements.push(record);
        }

        for (s, current) in changes.streams.into_iter().zip(stream_versions) {
            let mut next = current + 1;
            for e in s.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                insert_event(&mut tx, &stored).await?;
                next += 1;
                receipt.events.push(stored);
            }
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(receipt)
    }

    fn block_on<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let handle = Handle::try_current().map_err(|_| {
            StoreError::Unavailable("postgres ledger backend requires a tokio runtime".to_string())
        })?;
        match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| handle.block_on(fut)),
            _ => Err(StoreError::Unavailable(
                "postgres ledger backend requires the multi-threaded tokio runtime".to_string(),
            )),
        }
    }
}

impl LedgerBackend for PostgresLedgerBackend {
    fn entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
        self.block_on(self.load_entry(key))
    }

    fn entries(&self, scope: EntryScope) -> Result<Vec<StockEntry>, StoreError> {
        self.block_on(self.load_entries(scope))
    }

    fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError> {
        self.block_on(self.query_movements(filter, pagination))
    }

    fn movement_history(&self, key: StockKey) -> Result<Vec<MovementRecord>, StoreError> {
        self.block_on(self.load_movement_history(key))
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError> {
        self.block_on(self.load_events(aggregate_id))
    }

    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, StoreError> {
        self.block_on(self.load_stream_ids(aggregate_type))
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.block_on(self.apply(changes))
    }
}

async fn current_entry_version(tx: &mut Transaction<'_, Postgres>, key: StockKey) -> Result<u64, StoreError> {
    let version: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT version FROM stock_entries
        WHERE branch_id = $1 AND product_id = $2
        FOR UPDATE
        "#,
    )
    .bind(key.branch_id.as_uuid())
    .bind(key.product_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_entry_version", e))?;

    Ok(version.unwrap_or(0).max(0) as u64)
}

async fn current_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<u64, StoreError> {
    let version: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0)
        FROM ledger_events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    Ok(version.max(0) as u64)
}

/// Last journal sequence and commit time, read under the commit lock.
async fn journal_head(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(u64, Option<DateTime<Utc>>), StoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence), 0) AS last_sequence, MAX(occurred_at) AS last_commit_at
        FROM stock_movements
        "#,
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("journal_head", e))?;

    let last_sequence: i64 = row.try_get("last_sequence").map_err(|e| map_sqlx_error("journal_head", e))?;
    let last_commit_at: Option<DateTime<Utc>> =
        row.try_get("last_commit_at").map_err(|e| map_sqlx_error("journal_head", e))?;
    Ok((last_sequence.max(0) as u64, last_commit_at))
}

async fn write_entry(tx: &mut Transaction<'_, Postgres>, entry: &StockEntry, current: u64) -> Result<(), StoreError> {
    let result = if current == 0 {
        sqlx::query(
            r#"
            INSERT INTO stock_entries (branch_id, product_id, quantity, min_stock, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.branch_id.as_uuid())
        .bind(entry.product_id.as_uuid())
        .bind(entry.quantity)
        .bind(entry.min_stock)
        .bind(entry.updated_at)
        .bind(entry.version as i64)
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE stock_entries
            SET quantity = $3, min_stock = $4, updated_at = $5, version = $6
            WHERE branch_id = $1 AND product_id = $2 AND version = $7
            "#,
        )
        .bind(entry.branch_id.as_uuid())
        .bind(entry.product_id.as_uuid())
        .bind(entry.quantity)
        .bind(entry.min_stock)
        .bind(entry.updated_at)
        .bind(entry.version as i64)
        .bind(current as i64)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_entry", e))?;

    if result.rows_affected() != 1 {
        return Err(StoreError::Conflict(format!(
            "stock row {} changed during commit",
            entry.key()
        )));
    }
    Ok(())
}

async fn insert_movement(tx: &mut Transaction<'_, Postgres>, record: &MovementRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            sequence, id, branch_id, product_id, kind, quantity, previous_stock, new_stock,
            reason, reference_kind, reference_id, occurred_at, user_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(record.sequence as i64)
    .bind(record.id)
    .bind(record.branch_id.as_uuid())
    .bind(record.product_id.as_uuid())
    .bind(record.kind.as_str())
    .bind(record.quantity)
    .bind(record.previous_stock)
    .bind(record.new_stock)
    .bind(&record.reason)
    .bind(record.reference.kind.as_str())
    .bind(record.reference.id.map(|id| *id.as_uuid()))
    .bind(record.occurred_at)
    .bind(record.user_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

async fn insert_event(tx: &mut Transaction<'_, Postgres>, event: &StoredEvent) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_events (
            event_id, aggregate_id, aggregate_type, sequence_number, event_type,
            event_version, occurred_at, payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(event.event_id)
    .bind(event.aggregate_id.as_uuid())
    .bind(&event.aggregate_type)
    .bind(event.sequence_number as i64)
    .bind(&event.event_type)
    .bind(event.event_version as i32)
    .bind(event.occurred_at)
    .bind(&event.payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_event", e))?;
    Ok(())
}

/// Commit time never goes backwards, even if the wall clock does.
fn commit_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}

fn entry_from_row(row: &PgRow) -> Result<StockEntry, StoreError> {
    let read = |e| map_sqlx_error("decode_entry", e);
    let version: i64 = row.try_get("version").map_err(read)?;
    Ok(StockEntry {
        branch_id: BranchId::from_uuid(row.try_get("branch_id").map_err(read)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(read)?),
        quantity: row.try_get("quantity").map_err(read)?,
        min_stock: row.try_get("min_stock").map_err(read)?,
        updated_at: row.try_get("updated_at").map_err(read)?,
        version: version.max(0) as u64,
    })
}

fn movement_from_row(row: &PgRow) -> Result<MovementRecord, StoreError> {
    let read = |e| map_sqlx_error("decode_movement", e);
    let sequence: i64 = row.try_get("sequence").map_err(read)?;
    let kind: String = row.try_get("kind").map_err(read)?;
    let reference_kind: String = row.try_get("reference_kind").map_err(read)?;
    let reference_id: Option<Uuid> = row.try_get("reference_id").map_err(read)?;

    Ok(MovementRecord {
        id: row.try_get("id").map_err(read)?,
        sequence: sequence.max(0) as u64,
        branch_id: BranchId::from_uuid(row.try_get("branch_id").map_err(read)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(read)?),
        kind: parse_kind(&kind)?,
        quantity: row.try_get("quantity").map_err(read)?,
        previous_stock: row.try_get("previous_stock").map_err(read)?,
        new_stock: row.try_get("new_stock").map_err(read)?,
        reason: row.try_get("reason").map_err(read)?,
        reference: parse_reference(&reference_kind, reference_id)?,
        occurred_at: row.try_get("occurred_at").map_err(read)?,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(read)?),
    })
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent, StoreError> {
    let read = |e| map_sqlx_error("decode_event", e);
    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(read)?,
        aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id").map_err(read)?),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        sequence_number: sequence_number.max(0) as u64,
        event_type: row.try_get("event_type").map_err(read)?,
        event_version: event_version.max(0) as u32,
        occurred_at: row.try_get("occurred_at").map_err(read)?,
        payload: row.try_get("payload").map_err(read)?,
    })
}

fn parse_kind(raw: &str) -> Result<MovementKind, StoreError> {
    raw.parse().map_err(StoreError::Serialization)
}

fn parse_reference(raw_kind: &str, id: Option<Uuid>) -> Result<MovementReference, StoreError> {
    let kind: ReferenceKind = raw_kind.parse().map_err(StoreError::Serialization)?;
    Ok(MovementReference {
        kind,
        id: id.map(AggregateId::from_uuid),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            classify_database_error(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("failed to decode row in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn classify_database_error(code: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23505") => StoreError::Conflict(msg),
        Some("23514") => StoreError::InvalidCommit(msg),
        _ => StoreError::Unavailable(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unique_violations_are_retryable_conflicts() {
        let err = classify_database_error(Some("23505"), "duplicate key".to_string());
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = classify_database_error(Some("23514"), "check".to_string());
        assert!(matches!(err, StoreError::InvalidCommit(_)));

        let err = classify_database_error(None, "boom".to_string());
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn closed_pool_is_unavailable() {
        let err = map_sqlx_error("load_entry", sqlx::Error::PoolClosed);
        assert_eq!(
            err,
            StoreError::Unavailable("connection pool closed in load_entry".to_string())
        );
    }

    #[test]
    fn commit_time_never_goes_backwards() {
        let earlier = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let later = Utc.timestamp_opt(1_700_000_060, 0).unwrap();

        assert_eq!(commit_timestamp(later, Some(earlier)), later);
        assert_eq!(commit_timestamp(earlier, Some(later)), later);
        assert_eq!(commit_timestamp(earlier, None), earlier);
    }

    #[test]
    fn stored_labels_decode_back_to_domain_values() {
        assert_eq!(parse_kind("entrada").unwrap(), MovementKind::Inbound);
        assert_eq!(parse_kind("salida").unwrap(), MovementKind::Outbound);
        assert!(matches!(parse_kind("sideways"), Err(StoreError::Serialization(_))));

        let sale = Uuid::now_v7();
        assert_eq!(
            parse_reference("venta", Some(sale)).unwrap(),
            MovementReference::sale(AggregateId::from_uuid(sale))
        );
        assert_eq!(parse_reference("ajuste", None).unwrap(), MovementReference::adjustment());
        assert!(parse_reference("regalo", None).is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sync_calls_need_the_multi_threaded_runtime() {
        // A lazy pool never dials until first use.
        let pool = PgPool::connect_lazy("postgres://localhost/branchstock").unwrap();
        let backend = PostgresLedgerBackend::new(pool);

        let err = backend
            .entry(StockKey::new(BranchId::new(), ProductId::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
