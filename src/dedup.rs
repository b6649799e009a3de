use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::AppResult;
use crate::normalize::normalize_place_name;
use crate::similarity::{SimilarityScorer, TokenSortScorer};
use crate::store::CacheStore;

pub const SIMILARITY_THRESHOLD: f64 = 85.0;

// Fuzzy matcher over the set of keys currently in the persistent cache.
// The known-keys set is owned here and only changes through refresh, which
// the resolver calls after each successful save; a stale set can miss a
// fuzzy match (costing a redundant provider call) but never corrupts data.
pub struct Deduplicator {
    known_keys: Mutex<HashSet<String>>,
    scorer: Box<dyn SimilarityScorer>,
}

impl Deduplicator {
    pub fn new(store: &CacheStore) -> AppResult<Self> {
        Self::with_scorer(store, Box::new(TokenSortScorer))
    }

    pub fn with_scorer(store: &CacheStore, scorer: Box<dyn SimilarityScorer>) -> AppResult<Self> {
        let dedup = Self {
            known_keys: Mutex::new(HashSet::new()),
            scorer,
        };
        dedup.refresh(store)?;
        Ok(dedup)
    }

    pub fn refresh(&self, store: &CacheStore) -> AppResult<()> {
        let keys = store.place_keys()?;
        debug!(target: "dedup", known = keys.len(), "known keys refreshed");
        *self.known_keys.lock() = keys;
        Ok(())
    }

    pub fn find_similar_place(&self, name: &str, location_hint: &str) -> Option<(String, f64)> {
        let known = self.known_keys.lock();
        if known.is_empty() {
            return None;
        }

        let key = normalize_place_name(name, location_hint);
        if known.contains(&key) {
            return Some((key, 100.0));
        }

        best_match(self.scorer.as_ref(), &key, known.iter())
    }

    // Batch-local merge: later mentions collapse onto the canonical key of
    // the first sufficiently similar mention in the same batch. Compares only
    // within the batch, never against the persistent known-keys set.
    pub fn deduplicate_batch(&self, names: &[String]) -> Vec<(String, String)> {
        let mut seen_canonical: HashSet<String> = HashSet::new();
        let mut deduped = Vec::with_capacity(names.len());

        for name in names {
            let key = normalize_place_name(name, "");
            match best_match(self.scorer.as_ref(), &key, seen_canonical.iter()) {
                Some((canonical, _)) => deduped.push((name.clone(), canonical)),
                None => {
                    seen_canonical.insert(key.clone());
                    deduped.push((name.clone(), key));
                }
            }
        }

        deduped
    }

    #[cfg(test)]
    pub fn known_key_count(&self) -> usize {
        self.known_keys.lock().len()
    }
}

// Globally best-scoring candidate at or above the threshold; exact ties may
// resolve to any of the tied keys.
fn best_match<'a>(
    scorer: &dyn SimilarityScorer,
    key: &str,
    candidates: impl Iterator<Item = &'a String>,
) -> Option<(String, f64)> {
    let mut best: Option<(&'a String, f64)> = None;
    for candidate in candidates {
        let score = scorer.score(key, candidate);
        if best.map(|(_, prev)| score > prev).unwrap_or(true) {
            best = Some((candidate, score));
        }
    }
    best.filter(|(_, score)| *score >= SIMILARITY_THRESHOLD)
        .map(|(canonical, score)| (canonical.clone(), score))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex as SyncMutex;
    use tempfile::tempdir;

    use crate::db::bootstrap;
    use crate::secrets::SecretVault;
    use crate::store::PlaceRecord;

    use super::*;

    fn open_store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempdir().unwrap();
        let vault = SecretVault::in_memory();
        let bootstrap = bootstrap(dir.path(), "dedup.db", &vault).unwrap();
        let store = CacheStore::new(Arc::new(SyncMutex::new(bootstrap.context.connection)));
        (dir, store)
    }

    fn record(place_id: &str) -> PlaceRecord {
        PlaceRecord {
            place_id: place_id.into(),
            name: "Lucali".into(),
            formatted_address: "575 Henry St".into(),
            latitude: 40.68,
            longitude: -74.0,
            photo_url: None,
            photo_references: Vec::new(),
            raw_query: String::new(),
            confidence_score: 1.0,
        }
    }

    #[test]
    fn exact_key_scores_full() {
        let (_dir, store) = open_store();
        store.save_place("lucali_brooklyn", &record("p1")).unwrap();
        let dedup = Deduplicator::new(&store).unwrap();

        let (key, score) = dedup.find_similar_place("Lucali", "Brooklyn").unwrap();
        assert_eq!(key, "lucali_brooklyn");
        assert_eq!(score, 100.0);
    }

    #[test]
    fn near_duplicate_matches_cached_key() {
        let (_dir, store) = open_store();
        store.save_place("lucali_brooklyn", &record("p1")).unwrap();
        let dedup = Deduplicator::new(&store).unwrap();

        let (key, score) = dedup.find_similar_place("Lucali", "Brooklynn").unwrap();
        assert_eq!(key, "lucali_brooklyn");
        assert!(score >= SIMILARITY_THRESHOLD && score < 100.0);
    }

    #[test]
    fn unrelated_name_finds_nothing() {
        let (_dir, store) = open_store();
        store.save_place("lucali_brooklyn", &record("p1")).unwrap();
        let dedup = Deduplicator::new(&store).unwrap();

        assert!(dedup.find_similar_place("Katz Delicatessen", "").is_none());
    }

    #[test]
    fn empty_cache_finds_nothing() {
        let (_dir, store) = open_store();
        let dedup = Deduplicator::new(&store).unwrap();
        assert!(dedup.find_similar_place("Lucali", "").is_none());
    }

    #[test]
    fn refresh_picks_up_new_keys() {
        let (_dir, store) = open_store();
        let dedup = Deduplicator::new(&store).unwrap();
        assert_eq!(dedup.known_key_count(), 0);

        store.save_place("lucali_brooklyn", &record("p1")).unwrap();
        assert!(dedup.find_similar_place("Lucali", "Brooklyn").is_none());

        dedup.refresh(&store).unwrap();
        assert!(dedup.find_similar_place("Lucali", "Brooklyn").is_some());
    }

    #[test]
    fn batch_merges_near_duplicates() {
        let (_dir, store) = open_store();
        let dedup = Deduplicator::new(&store).unwrap();

        let names = vec![
            "Joe's Pizza".to_string(),
            "joes pizza".to_string(),
            "Katz Delicatessen".to_string(),
        ];
        let deduped = dedup.deduplicate_batch(&names);

        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].1, deduped[1].1);
        assert_ne!(deduped[0].1, deduped[2].1);
        assert_eq!(deduped[2].1, "katz_delicatessen");
    }

    #[test]
    fn batch_merge_ignores_persistent_cache() {
        let (_dir, store) = open_store();
        store.save_place("lucali_brooklyn", &record("p1")).unwrap();
        let dedup = Deduplicator::new(&store).unwrap();

        let deduped = dedup.deduplicate_batch(&["Lucali Brooklyn".to_string()]);
        // the cached key does not seed the batch-local set; the name mints
        // its own canonical key
        assert_eq!(deduped[0].1, "lucali_brooklyn");
    }
}
