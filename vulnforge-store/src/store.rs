//! Leak record persistence
//!
//! Two tables: `leak_items` (unique on `hash_key`) and `action_logs`
//! (append-only, FK to its item with cascade - declared for integrity even
//! though no delete path exists; records are durable by design).

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use vulnforge_core::{ActionRecord, CanonicalItem, LeakRecord, Sealed, Target, TargetType};

use crate::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leak_items (
    id TEXT PRIMARY KEY,
    target_type TEXT NOT NULL,
    target_value TEXT NOT NULL,
    leak_type TEXT NOT NULL,
    source TEXT NOT NULL,
    first_seen TEXT,
    last_seen TEXT,
    raw_ciphertext BLOB NOT NULL,
    raw_nonce BLOB NOT NULL,
    raw_tag BLOB NOT NULL,
    structured_fields TEXT NOT NULL DEFAULT '{}',
    confidence REAL NOT NULL DEFAULT 0.5,
    tags TEXT NOT NULL DEFAULT '[]',
    enrichment TEXT NOT NULL DEFAULT '{}',
    score INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    hash_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_leak_items_hash_key ON leak_items(hash_key);

CREATE TABLE IF NOT EXISTS action_logs (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL REFERENCES leak_items(id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    actor TEXT NOT NULL,
    notes TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_action_logs_item ON action_logs(item_id);

CREATE TABLE IF NOT EXISTS enrich_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    claimed_by TEXT,
    claimed_at TEXT
);
"#;

/// Result of a dedup upsert
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub id: String,
    /// true when a new record was created, false when an existing one was
    /// updated in place
    pub created: bool,
}

/// Listing filter. `limit`/`offset` are applied after the filter; results
/// are ordered by creation time descending.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub leak_type: Option<String>,
    pub tag: Option<String>,
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

/// SQLite-backed store for leak records and their audit trail.
#[derive(Clone)]
pub struct LeakStore {
    pool: SqlitePool,
}

impl LeakStore {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema. WAL journal mode, foreign keys on.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| sqlx::Error::Io(e))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool, shared with [`crate::EnrichQueue`].
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new record or update the existing one with the same
    /// `hash_key`, in a single atomic statement. The existing `id`,
    /// `created_at`, `enrichment`, and `score` are preserved on update;
    /// everything the producer owns is replaced.
    pub async fn upsert_item(
        &self,
        item: &CanonicalItem,
        sealed: &Sealed,
        hash_key: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let structured = serde_json::to_string(&item.structured_fields)?;
        let tags = serde_json::to_string(&item.tags)?;

        let row = sqlx::query(
            r#"
            INSERT INTO leak_items (id, target_type, target_value, leak_type, source,
                                    first_seen, last_seen,
                                    raw_ciphertext, raw_nonce, raw_tag,
                                    structured_fields, confidence, tags,
                                    enrichment, score, notes, hash_key,
                                    created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '{}', 0, ?, ?, ?, ?)
            ON CONFLICT(hash_key) DO UPDATE SET
                target_type = excluded.target_type,
                target_value = excluded.target_value,
                leak_type = excluded.leak_type,
                source = excluded.source,
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen,
                raw_ciphertext = excluded.raw_ciphertext,
                raw_nonce = excluded.raw_nonce,
                raw_tag = excluded.raw_tag,
                structured_fields = excluded.structured_fields,
                confidence = excluded.confidence,
                tags = excluded.tags,
                notes = excluded.notes,
                updated_at = excluded.updated_at
            RETURNING id, (created_at = updated_at) AS created
            "#,
        )
        .bind(&id)
        .bind(item.target.kind.to_string())
        .bind(&item.target.value)
        .bind(&item.leak_type)
        .bind(&item.source)
        .bind(item.first_seen)
        .bind(item.last_seen)
        .bind(&sealed.ciphertext)
        .bind(&sealed.nonce)
        .bind(&sealed.tag)
        .bind(&structured)
        .bind(item.confidence)
        .bind(&tags)
        .bind(&item.notes)
        .bind(hash_key)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            id: row.try_get("id")?,
            created: row.try_get("created")?,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<LeakRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM leak_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Filtered, paginated listing ordered by creation time descending.
    /// Returns the total count matching the filter plus the requested page.
    pub async fn list(&self, filter: &ItemFilter) -> Result<(i64, Vec<LeakRecord>), StoreError> {
        let mut count_query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM leak_items WHERE 1=1");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let mut page_query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM leak_items WHERE 1=1");
        push_filters(&mut page_query, filter);
        page_query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        page_query.push_bind(filter.limit);
        page_query.push(" OFFSET ");
        page_query.push_bind(filter.offset);

        let rows = page_query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((total, items))
    }

    /// Write back a worker's enrichment result and recomputed score in one
    /// transaction-equivalent statement.
    pub async fn apply_enrichment(
        &self,
        id: &str,
        enrichment: &Map<String, Value>,
        score: i64,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(enrichment)?;
        let result =
            sqlx::query("UPDATE leak_items SET enrichment = ?, score = ?, updated_at = ? WHERE id = ?")
                .bind(&encoded)
                .bind(score)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Append a human review action. Fails with `NotFound` when the parent
    /// record is absent; never mutates the record itself.
    pub async fn append_action(
        &self,
        item_id: &str,
        action: &str,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<ActionRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM leak_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(item_id.to_string()));
        }

        let record = ActionRecord {
            id: Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            action: action.to_string(),
            actor: actor.to_string(),
            notes: notes.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO action_logs (id, item_id, action, actor, notes, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.item_id)
        .bind(&record.action)
        .bind(&record.actor)
        .bind(&record.notes)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    pub async fn actions_for(&self, item_id: &str) -> Result<Vec<ActionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, item_id, action, actor, notes, created_at FROM action_logs WHERE item_id = ? ORDER BY created_at ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ActionRecord {
                    id: row.try_get("id")?,
                    item_id: row.try_get("item_id")?,
                    action: row.try_get("action")?,
                    actor: row.try_get("actor")?,
                    notes: row.try_get("notes")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Storage reachability probe for the health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ItemFilter) {
    if let Some(leak_type) = &filter.leak_type {
        query.push(" AND leak_type = ");
        query.push_bind(leak_type.clone());
    }
    if let Some(tag) = &filter.tag {
        query.push(" AND EXISTS (SELECT 1 FROM json_each(leak_items.tags) WHERE json_each.value = ");
        query.push_bind(tag.clone());
        query.push(")");
    }
    if let Some(min) = filter.min_score {
        query.push(" AND score >= ");
        query.push_bind(min);
    }
    if let Some(max) = filter.max_score {
        query.push(" AND score <= ");
        query.push_bind(max);
    }
}

fn record_from_row(row: &SqliteRow) -> Result<LeakRecord, StoreError> {
    let target_type: String = row.try_get("target_type")?;
    let structured: String = row.try_get("structured_fields")?;
    let tags: String = row.try_get("tags")?;
    let enrichment: String = row.try_get("enrichment")?;

    Ok(LeakRecord {
        id: row.try_get("id")?,
        target: Target {
            kind: TargetType::from(target_type.as_str()),
            value: row.try_get("target_value")?,
        },
        leak_type: row.try_get("leak_type")?,
        source: row.try_get("source")?,
        first_seen: row.try_get::<Option<DateTime<Utc>>, _>("first_seen")?,
        last_seen: row.try_get::<Option<DateTime<Utc>>, _>("last_seen")?,
        raw_ciphertext: row.try_get("raw_ciphertext")?,
        raw_nonce: row.try_get("raw_nonce")?,
        raw_tag: row.try_get("raw_tag")?,
        structured_fields: serde_json::from_str(&structured)?,
        confidence: row.try_get("confidence")?,
        tags: serde_json::from_str(&tags)?,
        enrichment: serde_json::from_str(&enrichment)?,
        score: row.try_get("score")?,
        notes: row.try_get("notes")?,
        hash_key: row.try_get("hash_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
