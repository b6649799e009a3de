use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_TELEMETRY_BUFFER_MAX_FILES: usize = 5;
const DEFAULT_CACHE_RETENTION_DAYS: u32 = 90;
const DEFAULT_MAX_PHOTO_WIDTH: u32 = 800;

const DEFAULT_FINDPLACE_ENDPOINT: &str =
    "https://maps.googleapis.com/maps/api/place/findplacefromtext/json";
const DEFAULT_DETAILS_ENDPOINT: &str =
    "https://maps.googleapis.com/maps/api/place/details/json";
const DEFAULT_PHOTO_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/place/photo";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google_maps_api_key: Option<SecretString>,
    pub database_file_name: String,
    pub cache_retention_days: u32,
    pub max_photo_width: u32,
    pub provider_timeout_secs: u64,
    pub findplace_endpoint: String,
    pub details_endpoint: String,
    pub photo_endpoint: String,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
    pub telemetry_buffer_max_files: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub database_file_name: String,
    pub cache_retention_days: u32,
    pub max_photo_width: u32,
    pub provider_timeout_secs: u64,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
    pub telemetry_buffer_max_files: usize,
    pub has_google_maps_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY")
                .or_else(|_| env::var("GOOGLE_API_KEY"))
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            database_file_name: env::var("CACHE_DB_FILE_NAME")
                .unwrap_or_else(|_| "venue-cache.db".to_string()),
            cache_retention_days: parse_u32("CACHE_RETENTION_DAYS", DEFAULT_CACHE_RETENTION_DAYS)
                .max(1),
            max_photo_width: parse_u32("MAX_PHOTO_WIDTH", DEFAULT_MAX_PHOTO_WIDTH).max(1),
            provider_timeout_secs: parse_u64("PLACES_TIMEOUT_SECS", 10).max(1),
            findplace_endpoint: endpoint_from_env(
                "PLACES_FINDPLACE_ENDPOINT",
                DEFAULT_FINDPLACE_ENDPOINT,
            ),
            details_endpoint: endpoint_from_env("PLACES_DETAILS_ENDPOINT", DEFAULT_DETAILS_ENDPOINT),
            photo_endpoint: endpoint_from_env("PLACES_PHOTO_ENDPOINT", DEFAULT_PHOTO_ENDPOINT),
            telemetry_enabled_by_default: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
            telemetry_buffer_max_files: parse_usize(
                "TELEMETRY_BUFFER_MAX_FILES",
                DEFAULT_TELEMETRY_BUFFER_MAX_FILES,
            )
            .max(1),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            database_file_name: self.database_file_name.clone(),
            cache_retention_days: self.cache_retention_days,
            max_photo_width: self.max_photo_width,
            provider_timeout_secs: self.provider_timeout_secs,
            telemetry_enabled_by_default: self.telemetry_enabled_by_default,
            telemetry_batch_size: self.telemetry_batch_size,
            telemetry_buffer_max_bytes: self.telemetry_buffer_max_bytes,
            telemetry_buffer_max_files: self.telemetry_buffer_max_files,
            has_google_maps_key: self.google_maps_api_key.is_some(),
        }
    }
}

fn endpoint_from_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GOOGLE_MAPS_API_KEY", "secret");
        env::set_var("CACHE_DB_FILE_NAME", "custom.db");
        env::set_var("TELEMETRY_ENABLED", "false");
        env::set_var("CACHE_RETENTION_DAYS", "30");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_file_name, "custom.db");
        assert_eq!(public.cache_retention_days, 30);
        assert!(!public.telemetry_enabled_by_default);
        assert!(public.has_google_maps_key);
        assert!(config.google_maps_api_key.is_some());
        assert_eq!(
            public.telemetry_buffer_max_bytes,
            DEFAULT_TELEMETRY_BUFFER_MAX_BYTES
        );

        env::remove_var("GOOGLE_MAPS_API_KEY");
        env::remove_var("CACHE_DB_FILE_NAME");
        env::remove_var("TELEMETRY_ENABLED");
        env::remove_var("CACHE_RETENTION_DAYS");
    }

    #[test]
    fn trims_trailing_slash_on_endpoint_overrides() {
        env::set_var("PLACES_DETAILS_ENDPOINT", "http://localhost:9999/details/");
        let config = AppConfig::from_env();
        assert_eq!(config.details_endpoint, "http://localhost:9999/details");
        env::remove_var("PLACES_DETAILS_ENDPOINT");
    }
}
