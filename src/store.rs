use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::errors::AppResult;

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub place_id: String,
    pub name: String,
    pub formatted_address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub photo_references: Vec<String>,
    #[serde(default)]
    pub raw_query: String,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached_places: usize,
    pub cached_batches: usize,
    pub aliases: usize,
    pub accessed_last_24h: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupSummary {
    pub removed_places: usize,
    pub removed_batches: usize,
}

// Persistent cache over the SQLCipher store. Every operation runs inside its
// own transaction; dropping the transaction on any error path rolls back, so
// no operation leaves a half-written row.
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Mutex<Connection>>,
}

impl CacheStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn get_place(&self, key: &str) -> AppResult<Option<PlaceRecord>> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let direct: Option<String> = tx
            .query_row(
                "SELECT place_data FROM place_cache WHERE normalized_key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(payload) = direct {
            tx.execute(
                "UPDATE place_cache
                 SET accessed_at = DATETIME('now'), access_count = access_count + 1
                 WHERE normalized_key = ?1",
                [key],
            )?;
            let record: PlaceRecord = serde_json::from_str(&payload)?;
            tx.commit()?;
            return Ok(Some(record));
        }

        // Alias lookups are exactly one hop and read-only: the canonical
        // row's access bookkeeping is not touched.
        let via_alias: Option<String> = tx
            .query_row(
                "SELECT p.place_data
                 FROM place_aliases a
                 JOIN place_cache p ON a.canonical_key = p.normalized_key
                 WHERE a.alias = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;

        match via_alias {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub fn save_place(&self, key: &str, record: &PlaceRecord) -> AppResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO place_cache (normalized_key, place_data)
             VALUES (?1, ?2)
             ON CONFLICT(normalized_key) DO UPDATE SET
                place_data = excluded.place_data",
            (key, payload.as_str()),
        )?;
        tx.commit()?;
        trace!(target: "place_cache", key, place_id = %record.place_id, "place cached");
        Ok(())
    }

    pub fn add_alias(&self, alias: &str, canonical_key: &str, score: f64) -> AppResult<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO place_aliases (alias, canonical_key, similarity_score)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(alias) DO UPDATE SET
                canonical_key = excluded.canonical_key,
                similarity_score = excluded.similarity_score",
            (alias, canonical_key, score),
        )?;
        tx.commit()?;
        trace!(target: "place_cache", alias, canonical_key, score, "alias recorded");
        Ok(())
    }

    pub fn get_batch(&self, video_id: &str) -> AppResult<Option<Value>> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let payload: Option<String> = tx
            .query_row(
                "SELECT extraction_data FROM batch_cache WHERE video_id = ?1",
                [video_id],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;
        match payload {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn save_batch(&self, video_id: &str, payload: &Value) -> AppResult<()> {
        let serialized = serde_json::to_string(payload)?;
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO batch_cache (video_id, extraction_data, created_at)
             VALUES (?1, ?2, DATETIME('now'))
             ON CONFLICT(video_id) DO UPDATE SET
                extraction_data = excluded.extraction_data,
                created_at = DATETIME('now')",
            (video_id, serialized.as_str()),
        )?;
        tx.commit()?;
        trace!(target: "place_cache", video_id, "batch result cached");
        Ok(())
    }

    // Drops place rows not read within the window and batch rows older than
    // it. Alias rows are left alone: an alias pointing at a pruned canonical
    // key simply stops resolving, and the next lookup re-queries the provider.
    pub fn cleanup(&self, max_age_days: u32) -> AppResult<CleanupSummary> {
        let cutoff = format!("-{max_age_days} days");
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let removed_places = tx.execute(
            "DELETE FROM place_cache WHERE accessed_at < DATETIME('now', ?1)",
            [cutoff.as_str()],
        )?;
        let removed_batches = tx.execute(
            "DELETE FROM batch_cache WHERE created_at < DATETIME('now', ?1)",
            [cutoff.as_str()],
        )?;
        tx.commit()?;
        Ok(CleanupSummary {
            removed_places,
            removed_batches,
        })
    }

    pub fn stats(&self) -> AppResult<CacheStats> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let cached_places = count(&tx, "SELECT COUNT(*) FROM place_cache")?;
        let cached_batches = count(&tx, "SELECT COUNT(*) FROM batch_cache")?;
        let aliases = count(&tx, "SELECT COUNT(*) FROM place_aliases")?;
        let accessed_last_24h = count(
            &tx,
            "SELECT COUNT(*) FROM place_cache WHERE accessed_at > DATETIME('now', '-1 day')",
        )?;
        tx.commit()?;
        Ok(CacheStats {
            cached_places,
            cached_batches,
            aliases,
            accessed_last_24h,
        })
    }

    pub fn place_keys(&self) -> AppResult<HashSet<String>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare("SELECT normalized_key FROM place_cache")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    #[cfg(test)]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }
}

fn count(conn: &Connection, sql: &str) -> AppResult<usize> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(value as usize)
}
