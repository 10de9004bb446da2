//! SQLite-backed local store: fact table, dirty tracking, pending deletes,
//! meta KV, and the share-import ledger.
//!
//! All access goes through a mutex-guarded connection with synchronous
//! closures, so no guard is ever held across an await point. Every
//! multi-statement write runs inside one transaction.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use sm_core::{meta, Fact, PendingDelete, Scope, SharedConversationImport, SmError, SmResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS facts (
    id              TEXT NOT NULL,
    key             TEXT PRIMARY KEY,
    scope           TEXT NOT NULL,
    value           TEXT NOT NULL,
    tags            TEXT NOT NULL DEFAULT '[]',
    confidence      REAL NOT NULL DEFAULT 1.0,
    source_session  TEXT,
    created         TEXT NOT NULL,
    last_confirmed  TEXT NOT NULL,
    access_count    INTEGER NOT NULL DEFAULT 0,
    dirty           INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_facts_scope ON facts(scope);
CREATE INDEX IF NOT EXISTS idx_facts_dirty ON facts(dirty) WHERE dirty = 1;

CREATE TABLE IF NOT EXISTS pending_deletes (
    key         TEXT PRIMARY KEY,
    deleted_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS shared_conversation_imports (
    share_id         TEXT PRIMARY KEY,
    conversation_id  TEXT NOT NULL,
    imported_at      TEXT NOT NULL,
    source_wallet    TEXT
);
";

pub struct FactStore {
    conn: Mutex<Connection>,
}

impl FactStore {
    pub fn open(path: &Path) -> SmResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SmError::Storage(format!("open sqlite: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| SmError::Storage(format!("pragma: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> SmResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SmError::Storage(format!("open in-memory sqlite: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| SmError::Storage(format!("pragma: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> SmResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(|e| SmError::Storage(format!("migration: {e}")))
        })
    }

    /// Run a synchronous closure against the connection. The closure is
    /// `FnOnce` (not async), so the guard drops before any await.
    fn with_conn<F, T>(&self, f: F) -> SmResult<T>
    where
        F: FnOnce(&Connection) -> SmResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SmError::Storage(e.to_string()))?;
        f(&conn)
    }

    /// Run a closure inside one transaction; commit on `Ok`.
    fn with_tx<F, T>(&self, f: F) -> SmResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> SmResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SmError::Storage(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| SmError::Storage(format!("begin: {e}")))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| SmError::Storage(format!("commit: {e}")))?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Facts
    // -----------------------------------------------------------------------

    /// Insert or replace by `key`, mark dirty, and clear any pending delete
    /// for the key — one atomic transaction. On replace the original `id`
    /// and `created` are kept (`created` never changes after insertion) and
    /// `last_confirmed` only advances: a stale caller timestamp cannot
    /// regress it. RFC 3339 text in a fixed offset compares in time order.
    pub fn upsert_fact(&self, fact: &Fact) -> SmResult<()> {
        let tags = serde_json::to_string(&fact.tags)?;
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO facts
                     (id, key, scope, value, tags, confidence, source_session,
                      created, last_confirmed, access_count, dirty)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1)
                 ON CONFLICT(key) DO UPDATE SET
                     scope = excluded.scope,
                     value = excluded.value,
                     tags = excluded.tags,
                     confidence = excluded.confidence,
                     source_session = excluded.source_session,
                     last_confirmed = MAX(facts.last_confirmed, excluded.last_confirmed),
                     access_count = excluded.access_count,
                     dirty = 1",
                params![
                    fact.id,
                    fact.key,
                    fact.scope.to_string(),
                    fact.value,
                    tags,
                    fact.confidence,
                    fact.source_session,
                    fact.created.to_rfc3339(),
                    fact.last_confirmed.to_rfc3339(),
                    fact.access_count as i64,
                ],
            )
            .map_err(|e| SmError::Storage(format!("upsert fact: {e}")))?;
            tx.execute(
                "DELETE FROM pending_deletes WHERE key = ?1",
                params![fact.key],
            )
            .map_err(|e| SmError::Storage(format!("clear tombstone: {e}")))?;
            Ok(())
        })
    }

    /// Remove a fact and queue a tombstone for the next push. Idempotent;
    /// returns whether a row was removed.
    pub fn delete_fact(&self, key: &str) -> SmResult<bool> {
        self.with_tx(|tx| {
            let removed = tx
                .execute("DELETE FROM facts WHERE key = ?1", params![key])
                .map_err(|e| SmError::Storage(format!("delete fact: {e}")))?;
            if removed > 0 {
                tx.execute(
                    "INSERT OR REPLACE INTO pending_deletes (key, deleted_at) VALUES (?1, ?2)",
                    params![key, Utc::now().to_rfc3339()],
                )
                .map_err(|e| SmError::Storage(format!("queue tombstone: {e}")))?;
            }
            Ok(removed > 0)
        })
    }

    pub fn get_fact(&self, key: &str) -> SmResult<Option<Fact>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {FACT_COLUMNS} FROM facts WHERE key = ?1"),
                params![key],
                row_to_fact,
            )
            .optional()
            .map_err(|e| SmError::Storage(format!("get fact: {e}")))
        })
    }

    pub fn get_all_facts(&self) -> SmResult<Vec<Fact>> {
        self.query_facts(
            &format!("SELECT {FACT_COLUMNS} FROM facts ORDER BY last_confirmed DESC"),
            params![],
        )
    }

    /// Facts visible in a scope: rows scoped to `scope` plus globals.
    pub fn get_facts_by_scope(&self, scope: &Scope) -> SmResult<Vec<Fact>> {
        self.query_facts(
            &format!(
                "SELECT {FACT_COLUMNS} FROM facts
                 WHERE scope = ?1 OR scope = 'global'
                 ORDER BY last_confirmed DESC"
            ),
            params![scope.to_string()],
        )
    }

    pub fn get_dirty_facts(&self) -> SmResult<Vec<Fact>> {
        self.query_facts(
            &format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE dirty = 1 ORDER BY last_confirmed ASC"
            ),
            params![],
        )
    }

    pub fn get_pending_deletes(&self) -> SmResult<Vec<PendingDelete>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, deleted_at FROM pending_deletes ORDER BY deleted_at ASC")
                .map_err(|e| SmError::Storage(format!("prepare: {e}")))?;
            let rows = stmt
                .query_map(params![], |row| {
                    Ok(PendingDelete {
                        key: row.get(0)?,
                        deleted_at: parse_ts(row, 1)?,
                    })
                })
                .map_err(|e| SmError::Storage(format!("pending deletes: {e}")))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| SmError::Storage(format!("pending deletes: {e}")))
        })
    }

    /// One consistent read of everything the next push must carry.
    pub fn dirty_snapshot(&self) -> SmResult<(Vec<Fact>, Vec<PendingDelete>)> {
        let facts = self.get_dirty_facts()?;
        let deletes = self.get_pending_deletes()?;
        Ok((facts, deletes))
    }

    /// Mark the push as confirmed: zero all dirty flags, drop every
    /// tombstone, and commit the version meta — one atomic transaction.
    pub fn clear_dirty_state(&self, pushed_version: u64) -> SmResult<()> {
        self.with_tx(|tx| {
            tx.execute("UPDATE facts SET dirty = 0", params![])
                .map_err(|e| SmError::Storage(format!("clear dirty: {e}")))?;
            tx.execute("DELETE FROM pending_deletes", params![])
                .map_err(|e| SmError::Storage(format!("clear tombstones: {e}")))?;
            set_meta_tx(tx, meta::CURRENT_VERSION, &pushed_version.to_string())?;
            set_meta_tx(tx, meta::LAST_PUSHED_VERSION, &pushed_version.to_string())?;
            Ok(())
        })
    }

    /// Write the reconstructed remote state after a pull: replayed facts
    /// land clean (`dirty = 0`), replayed deletes remove local rows, and
    /// `current_version` advances — one transaction. Local rows for keys
    /// the replay never touched are left alone.
    pub fn apply_remote_state(
        &self,
        facts: &[Fact],
        deleted_keys: &[String],
        version: u64,
    ) -> SmResult<()> {
        self.with_tx(|tx| {
            for fact in facts {
                let tags = serde_json::to_string(&fact.tags)?;
                tx.execute(
                    "INSERT OR REPLACE INTO facts
                         (id, key, scope, value, tags, confidence, source_session,
                          created, last_confirmed, access_count, dirty)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
                    params![
                        fact.id,
                        fact.key,
                        fact.scope.to_string(),
                        fact.value,
                        tags,
                        fact.confidence,
                        fact.source_session,
                        fact.created.to_rfc3339(),
                        fact.last_confirmed.to_rfc3339(),
                        fact.access_count as i64,
                    ],
                )
                .map_err(|e| SmError::Storage(format!("apply remote fact: {e}")))?;
            }
            for key in deleted_keys {
                tx.execute("DELETE FROM facts WHERE key = ?1", params![key])
                    .map_err(|e| SmError::Storage(format!("apply remote delete: {e}")))?;
            }
            set_meta_tx(tx, meta::CURRENT_VERSION, &version.to_string())?;
            Ok(())
        })
    }

    pub fn increment_access_count(&self, key: &str) -> SmResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE facts SET access_count = access_count + 1 WHERE key = ?1",
                params![key],
            )
            .map_err(|e| SmError::Storage(format!("access count: {e}")))?;
            Ok(())
        })
    }

    fn query_facts(&self, sql: &str, args: impl rusqlite::Params) -> SmResult<Vec<Fact>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| SmError::Storage(format!("prepare: {e}")))?;
            let rows = stmt
                .query_map(args, row_to_fact)
                .map_err(|e| SmError::Storage(format!("query facts: {e}")))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| SmError::Storage(format!("query facts: {e}")))
        })
    }

    // -----------------------------------------------------------------------
    // Meta KV
    // -----------------------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> SmResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SmError::Storage(format!("get meta: {e}")))
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> SmResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| SmError::Storage(format!("set meta: {e}")))?;
            Ok(())
        })
    }

    /// Numeric meta read; absent or unparsable values read as 0.
    pub fn get_meta_u64(&self, key: &str) -> SmResult<u64> {
        Ok(self
            .get_meta(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    // -----------------------------------------------------------------------
    // Share-import ledger
    // -----------------------------------------------------------------------

    pub fn has_shared_conversation_import(&self, share_id: &str) -> SmResult<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM shared_conversation_imports WHERE share_id = ?1",
                    params![share_id],
                    |row| row.get(0),
                )
                .map_err(|e| SmError::Storage(format!("check import: {e}")))?;
            Ok(count > 0)
        })
    }

    /// Record a redeemed share. A second insert for the same share id is a
    /// `DuplicateImport` error; callers check the ledger first.
    pub fn save_shared_conversation_import(
        &self,
        entry: &SharedConversationImport,
    ) -> SmResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO shared_conversation_imports
                     (share_id, conversation_id, imported_at, source_wallet)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.share_id,
                    entry.conversation_id,
                    entry.imported_at.to_rfc3339(),
                    entry.source_wallet,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    SmError::DuplicateImport(entry.share_id.clone())
                }
                other => SmError::Storage(format!("save import: {other}")),
            })?;
            Ok(())
        })
    }

    pub fn get_shared_conversation_imports(&self) -> SmResult<Vec<SharedConversationImport>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT share_id, conversation_id, imported_at, source_wallet
                     FROM shared_conversation_imports ORDER BY imported_at DESC",
                )
                .map_err(|e| SmError::Storage(format!("prepare: {e}")))?;
            let rows = stmt
                .query_map(params![], |row| {
                    Ok(SharedConversationImport {
                        share_id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        imported_at: parse_ts(row, 2)?,
                        source_wallet: row.get(3)?,
                    })
                })
                .map_err(|e| SmError::Storage(format!("imports: {e}")))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| SmError::Storage(format!("imports: {e}")))
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const FACT_COLUMNS: &str = "id, key, scope, value, tags, confidence, source_session, \
                            created, last_confirmed, access_count, dirty";

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let scope_text: String = row.get(2)?;
    let scope: Scope = scope_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("bad scope: {scope_text}").into(),
        )
    })?;
    let tags_text: String = row.get(4)?;
    let tags: Vec<String> = serde_json::from_str(&tags_text).unwrap_or_default();

    Ok(Fact {
        id: row.get(0)?,
        scope,
        key: row.get(1)?,
        value: row.get(3)?,
        tags,
        confidence: row.get(5)?,
        source_session: row.get(6)?,
        created: parse_ts(row, 7)?,
        last_confirmed: parse_ts(row, 8)?,
        access_count: row.get::<_, i64>(9)? as u64,
        dirty: row.get::<_, i64>(10)? != 0,
    })
}

fn parse_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })
}

fn set_meta_tx(tx: &Transaction<'_>, key: &str, value: &str) -> SmResult<()> {
    tx.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| SmError::Storage(format!("set meta: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FactStore {
        FactStore::open_in_memory().unwrap()
    }

    fn fact(key: &str, value: &str) -> Fact {
        Fact::new(Scope::Global, key, value)
    }

    // -- Upsert / get ----------------------------------------------------------

    #[test]
    fn upsert_and_get_round_trip() {
        let store = store();
        let f = fact("global:auth.strategy", "JWT")
            .with_tags(vec!["auth".into(), "decision".into()]);
        store.upsert_fact(&f).unwrap();

        let got = store.get_fact("global:auth.strategy").unwrap().unwrap();
        assert_eq!(got.value, "JWT");
        assert_eq!(got.tags, vec!["auth", "decision"]);
        assert!(got.dirty);
    }

    #[test]
    fn upsert_replaces_by_key_and_keeps_created() {
        let store = store();
        let first = fact("global:k", "v1");
        store.upsert_fact(&first).unwrap();

        let mut second = fact("global:k", "v2");
        second.created = Utc::now() + chrono::Duration::days(1);
        store.upsert_fact(&second).unwrap();

        let got = store.get_fact("global:k").unwrap().unwrap();
        assert_eq!(got.value, "v2");
        // Replace semantics never surface a unique-constraint error, and
        // insertion time is immutable.
        assert_eq!(got.created.timestamp(), first.created.timestamp());
        assert_eq!(store.get_all_facts().unwrap().len(), 1);
    }

    #[test]
    fn upsert_never_regresses_last_confirmed() {
        let store = store();
        let mut fresh = fact("global:k", "v1");
        fresh.last_confirmed = Utc::now();
        store.upsert_fact(&fresh).unwrap();

        // An out-of-order write with an older timestamp still lands its
        // value, but last_confirmed holds.
        let mut stale = fact("global:k", "v2");
        stale.last_confirmed = fresh.last_confirmed - chrono::Duration::hours(1);
        store.upsert_fact(&stale).unwrap();

        let got = store.get_fact("global:k").unwrap().unwrap();
        assert_eq!(got.value, "v2");
        assert_eq!(got.last_confirmed, fresh.last_confirmed);

        // A newer timestamp advances it.
        let mut newer = fact("global:k", "v3");
        newer.last_confirmed = fresh.last_confirmed + chrono::Duration::hours(1);
        store.upsert_fact(&newer).unwrap();
        let got = store.get_fact("global:k").unwrap().unwrap();
        assert_eq!(got.last_confirmed, newer.last_confirmed);
    }

    #[test]
    fn upsert_clears_pending_delete_for_key() {
        let store = store();
        store.upsert_fact(&fact("global:k", "v")).unwrap();
        assert!(store.delete_fact("global:k").unwrap());
        assert_eq!(store.get_pending_deletes().unwrap().len(), 1);

        store.upsert_fact(&fact("global:k", "v2")).unwrap();
        assert!(store.get_pending_deletes().unwrap().is_empty());
    }

    // -- Delete ----------------------------------------------------------------

    #[test]
    fn delete_queues_tombstone_and_is_idempotent() {
        let store = store();
        store.upsert_fact(&fact("global:k", "v")).unwrap();

        assert!(store.delete_fact("global:k").unwrap());
        assert!(store.get_fact("global:k").unwrap().is_none());
        let pending = store.get_pending_deletes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "global:k");

        // Second delete is a no-op but keeps the tombstone.
        assert!(!store.delete_fact("global:k").unwrap());
        assert_eq!(store.get_pending_deletes().unwrap().len(), 1);
    }

    #[test]
    fn delete_of_unknown_key_is_noop() {
        let store = store();
        assert!(!store.delete_fact("global:missing").unwrap());
        assert!(store.get_pending_deletes().unwrap().is_empty());
    }

    // -- Scope queries ---------------------------------------------------------

    #[test]
    fn scope_query_includes_globals() {
        let store = store();
        store.upsert_fact(&fact("global:a", "1")).unwrap();
        let mut project = Fact::new(Scope::Project("api".into()), "project:api:b", "2");
        project.last_confirmed = Utc::now() + chrono::Duration::seconds(5);
        store.upsert_fact(&project).unwrap();
        store
            .upsert_fact(&Fact::new(Scope::Project("web".into()), "project:web:c", "3"))
            .unwrap();

        let visible = store
            .get_facts_by_scope(&Scope::Project("api".into()))
            .unwrap();
        let keys: Vec<&str> = visible.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["project:api:b", "global:a"]);
    }

    // -- Dirty lifecycle -------------------------------------------------------

    #[test]
    fn clear_dirty_state_commits_version_atomically() {
        let store = store();
        store.upsert_fact(&fact("global:a", "1")).unwrap();
        store.upsert_fact(&fact("global:b", "2")).unwrap();
        store.delete_fact("global:b").unwrap();

        let (dirty, deletes) = store.dirty_snapshot().unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(deletes.len(), 1);

        store.clear_dirty_state(4).unwrap();
        assert!(store.get_dirty_facts().unwrap().is_empty());
        assert!(store.get_pending_deletes().unwrap().is_empty());
        assert_eq!(store.get_meta_u64(meta::CURRENT_VERSION).unwrap(), 4);
        assert_eq!(store.get_meta_u64(meta::LAST_PUSHED_VERSION).unwrap(), 4);
    }

    #[test]
    fn apply_remote_state_lands_clean() {
        let store = store();
        // A local leftover that the replay deletes.
        store.upsert_fact(&fact("global:old", "stale")).unwrap();

        let remote = vec![fact("global:a", "1"), fact("global:b", "2")];
        store
            .apply_remote_state(&remote, &["global:old".to_string()], 9)
            .unwrap();

        assert!(store.get_fact("global:old").unwrap().is_none());
        let a = store.get_fact("global:a").unwrap().unwrap();
        assert!(!a.dirty);
        assert!(store.get_dirty_facts().unwrap().is_empty());
        assert_eq!(store.get_meta_u64(meta::CURRENT_VERSION).unwrap(), 9);
    }

    // -- Access count ----------------------------------------------------------

    #[test]
    fn access_count_is_monotonic() {
        let store = store();
        store.upsert_fact(&fact("global:k", "v")).unwrap();
        store.increment_access_count("global:k").unwrap();
        store.increment_access_count("global:k").unwrap();
        let got = store.get_fact("global:k").unwrap().unwrap();
        assert_eq!(got.access_count, 2);
    }

    // -- Meta ------------------------------------------------------------------

    #[test]
    fn meta_kv_upserts() {
        let store = store();
        assert!(store.get_meta(meta::WALLET_ADDRESS).unwrap().is_none());
        store.set_meta(meta::WALLET_ADDRESS, "addr1").unwrap();
        store.set_meta(meta::WALLET_ADDRESS, "addr2").unwrap();
        assert_eq!(
            store.get_meta(meta::WALLET_ADDRESS).unwrap().unwrap(),
            "addr2"
        );
        assert_eq!(store.get_meta_u64(meta::CURRENT_VERSION).unwrap(), 0);
    }

    #[test]
    fn conversation_offset_key_shape() {
        let store = store();
        let key = meta::conversation_offset("cursor", "sess-1");
        store.set_meta(&key, "10").unwrap();
        assert_eq!(store.get_meta_u64(&key).unwrap(), 10);
    }

    // -- Share-import ledger ---------------------------------------------------

    #[test]
    fn share_import_ledger_rejects_duplicates() {
        let store = store();
        let entry = SharedConversationImport {
            share_id: "sid-1".into(),
            conversation_id: "c-1".into(),
            imported_at: Utc::now(),
            source_wallet: Some("addr".into()),
        };
        assert!(!store.has_shared_conversation_import("sid-1").unwrap());
        store.save_shared_conversation_import(&entry).unwrap();
        assert!(matches!(
            store.save_shared_conversation_import(&entry),
            Err(SmError::DuplicateImport(_))
        ));
        assert!(store.has_shared_conversation_import("sid-1").unwrap());
        assert_eq!(store.get_shared_conversation_imports().unwrap().len(), 1);
    }

    // -- Persistence -----------------------------------------------------------

    #[test]
    fn facts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = FactStore::open(&path).unwrap();
            store
                .upsert_fact(&fact("global:auth.strategy", "JWT"))
                .unwrap();
        }
        let store = FactStore::open(&path).unwrap();
        let got = store.get_fact("global:auth.strategy").unwrap().unwrap();
        assert_eq!(got.value, "JWT");
        // Unpushed mutations stay dirty across restarts.
        assert!(got.dirty);
    }
}
