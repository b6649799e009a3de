use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::dedup::Deduplicator;
use crate::errors::AppResult;
use crate::normalize::normalize_place_name;
use crate::provider::PlacesService;
use crate::store::{CacheStats, CacheStore, CleanupSummary, PlaceRecord};
use crate::telemetry::TelemetryClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueCandidate {
    pub name: String,
    #[serde(default)]
    pub location_hint: String,
}

impl VenueCandidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location_hint: String::new(),
        }
    }

    pub fn with_hint(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location_hint: hint.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPlace {
    pub name: String,
    pub original_query: String,
    pub formatted_address: String,
    pub place_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub photo_url: Option<String>,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_candidates: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub unique_places: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResolution {
    pub places: Vec<ResolvedPlace>,
    pub stats: BatchStats,
    pub from_cache: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBatch {
    places: Vec<ResolvedPlace>,
    timestamp: String,
}

// Orchestrates resolution: direct cache, then alias/fuzzy match, then the
// metered provider as a last resort. New results are persisted and the
// deduplicator's known keys refreshed before returning.
pub struct PlaceResolver {
    store: CacheStore,
    dedup: Deduplicator,
    lookup: PlacesService,
    telemetry: TelemetryClient,
}

impl PlaceResolver {
    pub fn new(
        store: CacheStore,
        dedup: Deduplicator,
        lookup: PlacesService,
        telemetry: TelemetryClient,
    ) -> Self {
        Self {
            store,
            dedup,
            lookup,
            telemetry,
        }
    }

    pub async fn resolve_single(
        &self,
        name: &str,
        location_hint: &str,
    ) -> AppResult<Option<ResolvedPlace>> {
        let key = normalize_place_name(name, location_hint);

        if let Some(record) = self.store.get_place(&key)? {
            debug!(target: "resolver", name, key = %key, "cache hit");
            return Ok(Some(resolved_from_record(name, record)));
        }

        if let Some((canonical, score)) = self.dedup.find_similar_place(name, location_hint) {
            if canonical != key {
                info!(
                    target: "resolver",
                    name,
                    canonical = %canonical,
                    score,
                    "near-duplicate of cached place"
                );
                self.store.add_alias(&key, &canonical, score)?;
                return match self.store.get_place(&canonical)? {
                    Some(record) => Ok(Some(resolved_from_record(name, record))),
                    None => {
                        // known-keys set said the record exists; treat the
                        // candidate as unresolved rather than paying for a
                        // provider call against a diverged cache
                        warn!(
                            target: "resolver",
                            canonical = %canonical,
                            "alias target missing from cache"
                        );
                        Ok(None)
                    }
                };
            }
        }

        let query = if location_hint.is_empty() {
            name.to_string()
        } else {
            format!("{name} {location_hint}")
        };
        debug!(target: "resolver", name, query = %query, "cache miss, querying provider");

        let fetched = match self.lookup.resolve(&query, None).await {
            Ok(result) => result,
            Err(err) if err.is_provider_scoped() => {
                warn!(target: "resolver", name, error = %err, "provider lookup failed");
                None
            }
            Err(err) => return Err(err),
        };

        let Some(record) = fetched else {
            return Ok(None);
        };

        // Failed lookups are never cached; only a successful resolution
        // writes, then the fuzzy matcher learns the new key.
        self.store.save_place(&key, &record)?;
        self.dedup.refresh(&self.store)?;
        Ok(Some(resolved_from_record(name, record)))
    }

    pub async fn resolve_batch(
        &self,
        candidates: &[VenueCandidate],
        video_id: Option<&str>,
    ) -> AppResult<BatchResolution> {
        let total_candidates = candidates.len();

        if let Some(id) = video_id {
            if let Some(payload) = self.store.get_batch(id)? {
                let stored: StoredBatch = serde_json::from_value(payload)?;
                info!(target: "resolver", video_id = id, "whole-batch cache hit");
                let stats = BatchStats {
                    total_candidates,
                    cache_hits: total_candidates,
                    api_calls: 0,
                    unique_places: stored.places.len(),
                };
                self.record_batch_event(Some(id), &stats, true);
                return Ok(BatchResolution {
                    places: stored.places,
                    stats,
                    from_cache: true,
                });
            }
        }

        let keys_before = self.store.place_keys()?;
        let mut places = Vec::with_capacity(total_candidates);
        for candidate in candidates {
            match self
                .resolve_single(&candidate.name, &candidate.location_hint)
                .await?
            {
                Some(place) => places.push(place),
                None => warn!(target: "resolver", name = %candidate.name, "candidate unresolved"),
            }
        }
        let keys_after = self.store.place_keys()?;

        let api_calls = keys_after.difference(&keys_before).count();
        let stats = BatchStats {
            total_candidates,
            cache_hits: total_candidates.saturating_sub(api_calls),
            api_calls,
            unique_places: places.len(),
        };

        if let Some(id) = video_id {
            if !places.is_empty() {
                let stored = StoredBatch {
                    places: places.clone(),
                    timestamp: Utc::now().to_rfc3339(),
                };
                self.store.save_batch(id, &serde_json::to_value(&stored)?)?;
            }
        }
        self.record_batch_event(video_id, &stats, false);

        Ok(BatchResolution {
            places,
            stats,
            from_cache: false,
        })
    }

    // Optional pre-pass over raw candidate names; see Deduplicator.
    pub fn deduplicate_batch(&self, names: &[String]) -> Vec<(String, String)> {
        self.dedup.deduplicate_batch(names)
    }

    pub fn cleanup(&self, max_age_days: u32) -> AppResult<CleanupSummary> {
        let summary = self.store.cleanup(max_age_days)?;
        self.dedup.refresh(&self.store)?;
        info!(
            target: "resolver",
            removed_places = summary.removed_places,
            removed_batches = summary.removed_batches,
            max_age_days,
            "cache cleanup completed"
        );
        if let Err(err) = self.telemetry.record(
            "cache_cleanup",
            json!({
                "removed_places": summary.removed_places,
                "removed_batches": summary.removed_batches,
                "max_age_days": max_age_days,
            }),
        ) {
            warn!(?err, "failed to record cleanup event");
        }
        Ok(summary)
    }

    pub fn cache_stats(&self) -> AppResult<CacheStats> {
        self.store.stats()
    }

    fn record_batch_event(&self, video_id: Option<&str>, stats: &BatchStats, from_cache: bool) {
        if let Err(err) = self.telemetry.record(
            "batch_resolved",
            json!({
                "video_id": video_id,
                "total_candidates": stats.total_candidates,
                "cache_hits": stats.cache_hits,
                "api_calls": stats.api_calls,
                "unique_places": stats.unique_places,
                "from_cache": from_cache,
            }),
        ) {
            warn!(?err, "failed to record batch telemetry event");
        }
    }
}

fn resolved_from_record(original_name: &str, record: PlaceRecord) -> ResolvedPlace {
    ResolvedPlace {
        name: record.name,
        original_query: original_name.to_string(),
        formatted_address: record.formatted_address,
        place_id: record.place_id,
        latitude: record.latitude,
        longitude: record.longitude,
        photo_url: record.photo_url,
        photos: record.photo_references,
    }
}
