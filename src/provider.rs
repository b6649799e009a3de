use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::store::PlaceRecord;

// Field masks keep per-call provider cost bounded: the find step only needs
// enough to pick a candidate, the details step adds geometry and photos.
const FINDPLACE_FIELDS: &str = "place_id,name,formatted_address";
const DETAILS_FIELDS: &str = "place_id,name,formatted_address,geometry,photos";
const LOCATION_BIAS_RADIUS_M: u32 = 50_000;

#[derive(Debug, Clone, Copy)]
pub struct LocationBias {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait PlaceLookup: Send + Sync {
    // Ok(None) means the provider had no candidate for the query; errors are
    // transport or provider-contract failures.
    async fn resolve(
        &self,
        query: &str,
        bias: Option<LocationBias>,
    ) -> AppResult<Option<PlaceRecord>>;
}

#[derive(Clone)]
pub struct PlacesService {
    inner: Arc<dyn PlaceLookup>,
}

impl PlacesService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config
            .google_maps_api_key
            .clone()
            .ok_or_else(|| AppError::Config("GOOGLE_MAPS_API_KEY is required".into()))?;
        let client = GooglePlacesClient::new(api_key, config)?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    pub fn from_lookup(lookup: Arc<dyn PlaceLookup>) -> Self {
        Self { inner: lookup }
    }

    pub async fn resolve(
        &self,
        query: &str,
        bias: Option<LocationBias>,
    ) -> AppResult<Option<PlaceRecord>> {
        self.inner.resolve(query, bias).await
    }
}

struct GooglePlacesClient {
    http: reqwest::Client,
    api_key: SecretString,
    findplace_endpoint: String,
    details_endpoint: String,
    photo_endpoint: String,
    max_photo_width: u32,
}

impl GooglePlacesClient {
    fn new(api_key: SecretString, config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            findplace_endpoint: config.findplace_endpoint.clone(),
            details_endpoint: config.details_endpoint.clone(),
            photo_endpoint: config.photo_endpoint.clone(),
            max_photo_width: config.max_photo_width,
        })
    }

    async fn find_candidate(
        &self,
        query: &str,
        bias: Option<LocationBias>,
    ) -> AppResult<Option<String>> {
        #[derive(serde::Deserialize)]
        struct Response {
            status: String,
            #[serde(default)]
            candidates: Vec<Candidate>,
        }

        #[derive(serde::Deserialize)]
        struct Candidate {
            place_id: String,
        }

        let mut request = self.http.get(&self.findplace_endpoint).query(&[
            ("input", query),
            ("inputtype", "textquery"),
            ("fields", FINDPLACE_FIELDS),
            ("key", self.api_key.expose_secret()),
        ]);
        if let Some(bias) = bias {
            let circle = format!(
                "circle:{LOCATION_BIAS_RADIUS_M}@{},{}",
                bias.latitude, bias.longitude
            );
            request = request.query(&[("locationbias", circle.as_str())]);
        }

        let response = request.send().await?.error_for_status()?;
        let parsed: Response = response.json().await?;

        match parsed.status.as_str() {
            "OK" => Ok(parsed
                .candidates
                .into_iter()
                .next()
                .map(|candidate| candidate.place_id)),
            "ZERO_RESULTS" => {
                debug!(target: "places_client", query, "no candidates for query");
                Ok(None)
            }
            other => Err(AppError::Provider(format!(
                "find-place returned status {other}"
            ))),
        }
    }

    async fn fetch_details(&self, place_id: &str, query: &str) -> AppResult<PlaceRecord> {
        #[derive(serde::Deserialize)]
        struct Response {
            status: String,
            result: Option<ResponseResult>,
        }

        #[derive(serde::Deserialize)]
        struct ResponseResult {
            place_id: Option<String>,
            name: Option<String>,
            formatted_address: Option<String>,
            geometry: Option<Geometry>,
            #[serde(default)]
            photos: Vec<Photo>,
        }

        #[derive(serde::Deserialize)]
        struct Geometry {
            location: Location,
        }

        #[derive(serde::Deserialize)]
        struct Location {
            lat: f64,
            lng: f64,
        }

        #[derive(serde::Deserialize)]
        struct Photo {
            photo_reference: Option<String>,
        }

        let response = self
            .http
            .get(&self.details_endpoint)
            .query(&[
                ("place_id", place_id),
                ("fields", DETAILS_FIELDS),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        if parsed.status != "OK" {
            return Err(AppError::Provider(format!(
                "details returned status {}",
                parsed.status
            )));
        }
        let result = parsed
            .result
            .ok_or_else(|| AppError::Provider("details response missing result".into()))?;
        let location = result
            .geometry
            .ok_or_else(|| AppError::Provider("details response missing geometry".into()))?
            .location;

        let photo_references: Vec<String> = result
            .photos
            .into_iter()
            .filter_map(|photo| photo.photo_reference)
            .collect();
        let photo_url = photo_references
            .first()
            .map(|reference| self.photo_url(reference));

        Ok(PlaceRecord {
            place_id: result.place_id.unwrap_or_else(|| place_id.to_string()),
            name: result.name.unwrap_or_else(|| query.to_string()),
            formatted_address: result.formatted_address.unwrap_or_default(),
            latitude: location.lat,
            longitude: location.lng,
            photo_url,
            photo_references,
            raw_query: query.to_string(),
            confidence_score: 1.0,
        })
    }

    // Photo URLs are synthesized for the caller, never fetched here.
    fn photo_url(&self, reference: &str) -> String {
        format!(
            "{}?maxwidth={}&photo_reference={}&key={}",
            self.photo_endpoint,
            self.max_photo_width,
            reference,
            self.api_key.expose_secret()
        )
    }
}

#[async_trait]
impl PlaceLookup for GooglePlacesClient {
    async fn resolve(
        &self,
        query: &str,
        bias: Option<LocationBias>,
    ) -> AppResult<Option<PlaceRecord>> {
        let Some(place_id) = self.find_candidate(query, bias).await? else {
            warn!(target: "places_client", query, "no place found");
            return Ok(None);
        };
        let record = self.fetch_details(&place_id, query).await?;
        Ok(Some(record))
    }
}
