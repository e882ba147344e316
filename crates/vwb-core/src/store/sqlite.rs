use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    domain::{ChatId, ProductId, RunTimestamp},
    errors::Error,
    store::{
        ChatSubscriptions, ConversationState, EnrichedProduct, NewSubscriber, Product, RunBatch,
        RunCommit, Store, VersionSummary, WatchListEntry, WATCH_LIST_LATEST,
    },
    Result,
};

const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/migrations/0001_init.sql"
    )),
)];

const PRODUCT_COLUMNS: &str = "p.id, p.name, p.label, p.category, p.catalog_url, p.info_url";

/// SQLite-backed [`Store`].
///
/// One connection behind a mutex; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        configure_connection(&mut conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::External("sqlite connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::External(format!("sqlite task failed: {e}")))?
    }
}

fn configure_connection(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))? as u32;

    if current > LATEST_SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "sqlite schema version is newer than this build: db={current}, app={LATEST_SCHEMA_VERSION}"
        )));
    }
    if current == LATEST_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", *version as i64)?;
        tracing::info!(version, "applied sqlite migration");
    }
    tx.commit()?;
    Ok(())
}

fn date_to_sql(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_from_sql(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: ProductId(row.get(0)?),
        name: row.get(1)?,
        label: row.get(2)?,
        category: row.get(3)?,
        catalog_url: row.get(4)?,
        info_url: row.get(5)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<VersionSummary> {
    Ok(VersionSummary {
        release_label: row.get(0)?,
        version: row.get(1)?,
        version_release_date: date_from_sql(row.get(2)?),
        version_release_link: row.get(3)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationState> {
    Ok(ConversationState {
        chat_id: ChatId(row.get(0)?),
        command: row.get(1)?,
        step: row.get(2)?,
        data: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Escape LIKE wildcards so user keywords match literally.
fn like_pattern(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len() + 2);
    out.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl Store for SqliteStore {
    async fn commit_run(&self, batch: RunBatch) -> Result<RunCommit> {
        self.with_conn(move |conn| {
            let run_ms = batch.run_ts.as_millis();
            let tx = conn.transaction()?;
            let mut commit = RunCommit::default();

            {
                let mut upsert = tx.prepare_cached(
                    "INSERT INTO product (name, label, category, catalog_url, info_url, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                     ON CONFLICT(name) DO UPDATE SET
                       label = excluded.label,
                       category = excluded.category,
                       catalog_url = excluded.catalog_url,
                       info_url = excluded.info_url,
                       updated_at = excluded.updated_at
                     WHERE product.label IS NOT excluded.label
                        OR product.category IS NOT excluded.category
                        OR product.catalog_url IS NOT excluded.catalog_url
                        OR product.info_url IS NOT excluded.info_url",
                )?;
                for p in &batch.products {
                    let n = upsert.execute(params![
                        p.name,
                        p.label,
                        p.category,
                        p.catalog_url,
                        p.info_url,
                        run_ms
                    ])?;
                    if n == 0 {
                        tracing::debug!(product = %p.name, "product upsert affected no rows");
                        commit.products_unchanged += 1;
                    } else {
                        commit.products_upserted += 1;
                    }
                }

                let mut insert = tx.prepare_cached(
                    "INSERT INTO version_snapshot (
                       product_id, release_name, release_codename, release_label, release_date,
                       version, version_release_date, version_release_link, run_timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for v in &batch.versions {
                    insert.execute(params![
                        v.product_id.0,
                        v.release_name,
                        v.release_codename,
                        v.release_label,
                        date_to_sql(&v.release_date),
                        v.version,
                        v.version_release_date.as_ref().map(date_to_sql),
                        v.version_release_link,
                        run_ms
                    ])?;
                    commit.versions_inserted += 1;
                }
            }

            if let Some(deadline) = batch.commit_deadline {
                if Instant::now() >= deadline {
                    // Dropping the transaction rolls it back.
                    drop(tx);
                    tracing::warn!(run_ts = %batch.run_ts, "deadline passed before commit, rolled back");
                    return Err(Error::Cancelled(
                        "pipeline deadline passed before commit".to_string(),
                    ));
                }
            }

            tx.commit()?;
            Ok(commit)
        })
        .await
    }

    async fn watched_products(&self) -> Result<Vec<Product>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM product p
                 WHERE EXISTS (SELECT 1 FROM subscription s WHERE s.product_id = p.id)
                 ORDER BY p.id"
            ))?;
            let rows = stmt.query_map([], product_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn product_ids_in_run(&self, run_ts: RunTimestamp) -> Result<Vec<ProductId>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT product_id FROM version_snapshot
                 WHERE run_timestamp = ?1 ORDER BY product_id",
            )?;
            let rows = stmt.query_map([run_ts.as_millis()], |row| row.get(0).map(ProductId))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn discard_run(&self, run_ts: RunTimestamp) -> Result<usize> {
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM version_snapshot WHERE run_timestamp = ?1",
                [run_ts.as_millis()],
            )?)
        })
        .await
    }

    async fn products_with_new_releases(
        &self,
        run_ts: RunTimestamp,
        candidates: &[ProductId],
    ) -> Result<Vec<EnrichedProduct>> {
        let candidates = candidates.to_vec();
        self.with_conn(move |conn| {
            let run_ms = run_ts.as_millis();
            let mut out = Vec::new();

            for product_id in candidates {
                let previous: Option<i64> = conn.query_row(
                    "SELECT MAX(run_timestamp) FROM version_snapshot
                     WHERE product_id = ?1 AND run_timestamp < ?2",
                    params![product_id.0, run_ms],
                    |row| row.get(0),
                )?;
                let Some(previous) = previous else {
                    tracing::debug!(product_id = product_id.0, "no previous run, baseline only");
                    continue;
                };

                let changed: bool = conn.query_row(
                    "SELECT EXISTS (
                       SELECT 1 FROM version_snapshot cur
                       WHERE cur.product_id = ?1 AND cur.run_timestamp = ?2
                         AND NOT EXISTS (
                           SELECT 1 FROM version_snapshot prev
                           WHERE prev.product_id = ?1 AND prev.run_timestamp = ?3
                             AND prev.release_name = cur.release_name
                             AND prev.version = cur.version
                             AND prev.version_release_date IS cur.version_release_date))",
                    params![product_id.0, run_ms, previous],
                    |row| row.get(0),
                )?;
                if !changed {
                    continue;
                }

                let head = conn
                    .query_row(
                        "SELECT label, info_url FROM product WHERE id = ?1",
                        [product_id.0],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                let Some((label, info_url)) = head else {
                    continue;
                };

                let mut stmt = conn.prepare_cached(
                    "SELECT release_label, version, version_release_date, version_release_link
                     FROM version_snapshot
                     WHERE product_id = ?1 AND run_timestamp = ?2
                     ORDER BY id",
                )?;
                let versions = stmt
                    .query_map(params![product_id.0, run_ms], summary_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                out.push(EnrichedProduct {
                    product_id,
                    label,
                    info_url,
                    versions,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn subscriptions_by_chat(&self) -> Result<Vec<ChatSubscriptions>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT chat_id, product_id FROM subscription ORDER BY chat_id, product_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((ChatId(row.get(0)?), ProductId(row.get(1)?)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut out: Vec<ChatSubscriptions> = Vec::new();
            for (chat_id, product_id) in rows {
                match out.last_mut() {
                    Some(group) if group.chat_id == chat_id => group.product_ids.push(product_id),
                    _ => out.push(ChatSubscriptions {
                        chat_id,
                        product_ids: vec![product_id],
                    }),
                }
            }
            Ok(out)
        })
        .await
    }

    async fn watch_list(&self, chat_id: ChatId) -> Result<Vec<WatchListEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT p.id, p.name, p.label, p.info_url
                 FROM subscription s JOIN product p ON p.id = s.product_id
                 WHERE s.chat_id = ?1
                 ORDER BY p.label COLLATE NOCASE, p.id",
            )?;
            let heads = stmt
                .query_map([chat_id.0], |row| {
                    Ok((
                        ProductId(row.get(0)?),
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut latest_stmt = conn.prepare_cached(
                "SELECT release_label, version, version_release_date, version_release_link
                 FROM version_snapshot
                 WHERE product_id = ?1
                   AND run_timestamp = (SELECT MAX(run_timestamp) FROM version_snapshot WHERE product_id = ?1)
                 ORDER BY release_date DESC, id
                 LIMIT ?2",
            )?;

            let mut out = Vec::with_capacity(heads.len());
            for (product_id, name, label, info_url) in heads {
                let latest = latest_stmt
                    .query_map(
                        params![product_id.0, WATCH_LIST_LATEST as i64],
                        summary_from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                out.push(WatchListEntry {
                    product_id,
                    name,
                    label,
                    info_url,
                    latest,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn search_products(&self, keyword: &str, limit: usize) -> Result<Vec<Product>> {
        let pattern = like_pattern(keyword);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM product p
                 WHERE p.label LIKE ?1 ESCAPE '\\'
                 ORDER BY p.label COLLATE NOCASE, p.id
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![pattern, limit as i64], product_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn product_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PRODUCT_COLUMNS} FROM product p WHERE p.id = ?1"),
                    [id.0],
                    product_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn subscribed_product_by_name(
        &self,
        chat_id: ChatId,
        name: &str,
    ) -> Result<Option<Product>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {PRODUCT_COLUMNS}
                         FROM subscription s JOIN product p ON p.id = s.product_id
                         WHERE s.chat_id = ?1 AND p.name = ?2"
                    ),
                    params![chat_id.0, name],
                    product_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn subscription_exists(&self, chat_id: ChatId, product_id: ProductId) -> Result<bool> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM subscription WHERE chat_id = ?1 AND product_id = ?2)",
                params![chat_id.0, product_id.0],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn create_subscription(&self, chat_id: ChatId, product_id: ProductId) -> Result<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO subscription (chat_id, product_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![chat_id.0, product_id.0, now_ms()],
            )?;
            Ok(n == 1)
        })
        .await
    }

    async fn delete_subscription(&self, chat_id: ChatId, product_id: ProductId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM subscription WHERE chat_id = ?1 AND product_id = ?2",
                params![chat_id.0, product_id.0],
            )?;
            Ok(())
        })
        .await
    }

    async fn subscriber_exists(&self, chat_id: ChatId) -> Result<bool> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM subscriber WHERE chat_id = ?1)",
                [chat_id.0],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn create_subscriber(&self, subscriber: NewSubscriber) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO subscriber (chat_id, username, first_name, last_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    subscriber.chat_id.0,
                    subscriber.username,
                    subscriber.first_name,
                    subscriber.last_name,
                    now_ms()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn conversation(&self, chat_id: ChatId) -> Result<Option<ConversationState>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT chat_id, command, step, data, created_at, updated_at
                     FROM conversation WHERE chat_id = ?1",
                    [chat_id.0],
                    conversation_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn put_conversation(&self, state: &ConversationState) -> Result<()> {
        let state = state.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversation (chat_id, command, step, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(chat_id) DO UPDATE SET
                   command = excluded.command,
                   step = excluded.step,
                   data = excluded.data,
                   updated_at = excluded.updated_at",
                params![
                    state.chat_id.0,
                    state.command,
                    state.step,
                    state.data,
                    state.created_at,
                    state.updated_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn advance_conversation(
        &self,
        expected_command: &str,
        expected_step: i16,
        next: &ConversationState,
    ) -> Result<bool> {
        let expected_command = expected_command.to_string();
        let next = next.clone();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE conversation
                 SET command = ?1, step = ?2, data = ?3, updated_at = ?4
                 WHERE chat_id = ?5 AND command = ?6 AND step = ?7",
                params![
                    next.command,
                    next.step,
                    next.data,
                    next.updated_at,
                    next.chat_id.0,
                    expected_command,
                    expected_step
                ],
            )?;
            Ok(n == 1)
        })
        .await
    }

    async fn delete_conversation(&self, chat_id: ChatId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM conversation WHERE chat_id = ?1", [chat_id.0])?;
            Ok(())
        })
        .await
    }
}
