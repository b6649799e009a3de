mod config;
mod db;
mod dedup;
mod errors;
mod normalize;
mod provider;
mod resolver;
mod secrets;
mod similarity;
mod store;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{AppConfig, PublicAppConfig};
pub use db::{bootstrap, DatabaseBootstrap, DatabaseContext, DB_KEY_ALIAS};
pub use dedup::{Deduplicator, SIMILARITY_THRESHOLD};
pub use errors::{AppError, AppResult};
pub use normalize::normalize_place_name;
pub use provider::{LocationBias, PlaceLookup, PlacesService};
pub use resolver::{
    BatchResolution, BatchStats, PlaceResolver, ResolvedPlace, VenueCandidate,
};
pub use secrets::{SecretLifecycle, SecretVault};
pub use similarity::{SimilarityScorer, TokenSortScorer};
pub use store::{CacheStats, CacheStore, CleanupSummary, PlaceRecord};
pub use telemetry::TelemetryClient;

pub const VAULT_SERVICE_NAME: &str = "VenueResolver";

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub database_path: String,
    pub telemetry_buffer_path: String,
    pub telemetry_queue_depth: usize,
    pub has_database_key: bool,
    pub config: PublicAppConfig,
    pub database_recovered: bool,
    pub database_key_lifecycle: String,
}

// The one service object per process: owns the encrypted cache, the fuzzy
// deduplicator, the provider client, and the telemetry buffer. Construction
// fails fast when provider credentials are missing.
pub struct ResolverEngine {
    resolver: PlaceResolver,
    store: CacheStore,
    config: AppConfig,
    vault: SecretVault,
    telemetry: TelemetryClient,
    db_path: PathBuf,
    db_bootstrap_recovered: bool,
    db_key_lifecycle: SecretLifecycle,
}

impl ResolverEngine {
    pub fn initialize<P: AsRef<Path>>(
        data_dir: P,
        config: AppConfig,
        vault: SecretVault,
    ) -> AppResult<Self> {
        init_tracing();
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let lookup = PlacesService::new(&config)?;
        let DatabaseBootstrap {
            context: DatabaseContext { connection, path },
            key_lifecycle,
            recovered,
        } = bootstrap(data_dir, &config.database_file_name, &vault)?;
        let telemetry = TelemetryClient::new(data_dir, &config)?;

        let store = CacheStore::new(Arc::new(Mutex::new(connection)));
        let dedup = Deduplicator::new(&store)?;
        let resolver = PlaceResolver::new(store.clone(), dedup, lookup, telemetry.clone());

        if let Err(err) = telemetry.record(
            "engine_start",
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "key_lifecycle": key_lifecycle.as_str(),
                "recovered": recovered,
            }),
        ) {
            warn!(?err, "failed to queue engine start event");
        }
        if let Err(err) = telemetry.flush() {
            warn!(?err, "failed to flush telemetry queue");
        }

        Ok(Self {
            resolver,
            store,
            config,
            vault,
            telemetry,
            db_path: path,
            db_bootstrap_recovered: recovered,
            db_key_lifecycle: key_lifecycle,
        })
    }

    pub fn resolver(&self) -> &PlaceResolver {
        &self.resolver
    }

    pub async fn resolve_batch(
        &self,
        candidates: &[VenueCandidate],
        video_id: Option<&str>,
    ) -> AppResult<BatchResolution> {
        self.resolver.resolve_batch(candidates, video_id).await
    }

    pub async fn resolve_single(
        &self,
        name: &str,
        location_hint: &str,
    ) -> AppResult<Option<ResolvedPlace>> {
        self.resolver.resolve_single(name, location_hint).await
    }

    pub fn deduplicate_batch(&self, names: &[String]) -> Vec<(String, String)> {
        self.resolver.deduplicate_batch(names)
    }

    pub fn cleanup(&self) -> AppResult<CleanupSummary> {
        self.resolver.cleanup(self.config.cache_retention_days)
    }

    pub fn cache_stats(&self) -> AppResult<CacheStats> {
        self.store.stats()
    }

    pub fn health(&self) -> AppResult<EngineHealth> {
        let has_key = self.vault.has(DB_KEY_ALIAS)?;
        Ok(EngineHealth {
            database_path: self.db_path.to_string_lossy().to_string(),
            telemetry_buffer_path: self.telemetry.buffer_path().to_string_lossy().to_string(),
            telemetry_queue_depth: self.telemetry.queue_depth(),
            has_database_key: has_key,
            config: self.config.public_profile(),
            database_recovered: self.db_bootstrap_recovered,
            database_key_lifecycle: self.db_key_lifecycle.as_str().to_string(),
        })
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,venue_resolver=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
