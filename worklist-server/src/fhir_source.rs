//! Upstream FHIR data: a remote REST server with a TTL cache, or a local fixture bundle

use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use worklist_core::{bundle_resources, is_valid_id, next_link, DataSource, Resource};

use crate::config::FhirSettings;

#[derive(Error, Debug)]
pub enum FhirError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("Invalid search: {0}")]
    InvalidQuery(String),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FhirResult<T> = Result<T, FhirError>;

struct CacheEntry {
    fetched_at: Instant,
    resources: Arc<Vec<Value>>,
}

/// Client for a Medplum-style FHIR REST API
pub struct FhirClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
    page_size: u32,
    max_pages: u32,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl FhirClient {
    pub fn new(base_url: &str, settings: &FhirSettings) -> FhirResult<Self> {
        // A trailing slash keeps `join` from replacing the last path segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| FhirError::InvalidQuery(format!("bad base URL {}: {}", base_url, e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            access_token: settings.access_token.clone(),
            page_size: settings.page_size.max(1),
            max_pages: settings.max_pages.max(1),
            ttl: Duration::from_secs(settings.cache_ttl_secs),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn search_url(&self, source: &DataSource) -> FhirResult<Url> {
        let mut url = self
            .base_url
            .join(source.resource_type.as_str())
            .map_err(|e| FhirError::InvalidQuery(e.to_string()))?;
        let pairs = source
            .search_pairs()
            .map_err(|e| FhirError::InvalidQuery(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            for (name, value) in &pairs {
                query.append_pair(name, value);
            }
            if !pairs.iter().any(|(name, _)| name == "_count") {
                query.append_pair("_count", &self.page_size.to_string());
            }
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> FhirResult<Option<Value>> {
        let mut request = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/fhir+json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status if !status.is_success() => Err(FhirError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
            _ => Ok(Some(response.json().await?)),
        }
    }

    /// Run the panel's search, following `next` links up to `max_pages`
    pub async fn search(&self, source: &DataSource, refresh: bool) -> FhirResult<Arc<Vec<Value>>> {
        let url = self.search_url(source)?;
        let key = url.to_string();

        if !refresh && !self.ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key)
                && entry.fetched_at.elapsed() < self.ttl
            {
                tracing::debug!(url = %key, "FHIR search served from cache");
                return Ok(entry.resources.clone());
            }
        }

        let mut resources = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;
        while let Some(page_url) = next.take() {
            let bundle = self.get_json(page_url.clone()).await?.ok_or_else(|| {
                FhirError::Status {
                    status: StatusCode::NOT_FOUND.as_u16(),
                    url: page_url.to_string(),
                }
            })?;
            if bundle.get("resourceType").and_then(|t| t.as_str()) != Some("Bundle") {
                return Err(FhirError::InvalidBundle(format!(
                    "expected a Bundle from {}",
                    page_url
                )));
            }
            resources.extend(bundle_resources(&bundle));
            pages += 1;

            if pages >= self.max_pages {
                if next_link(&bundle).is_some() {
                    tracing::warn!(url = %key, pages, "Stopped following next links at max_pages");
                }
                break;
            }
            next = match next_link(&bundle) {
                Some(link) => Some(
                    page_url
                        .join(&link)
                        .map_err(|e| FhirError::InvalidBundle(format!("bad next link: {}", e)))?,
                ),
                None => None,
            };
        }

        tracing::info!(url = %key, pages, count = resources.len(), "Fetched FHIR search");
        let resources = Arc::new(resources);

        if !self.ttl.is_zero() {
            let mut cache = self.cache.write().await;
            let ttl = self.ttl;
            cache.retain(|_, entry| entry.fetched_at.elapsed() < ttl);
            cache.insert(
                key,
                CacheEntry {
                    fetched_at: Instant::now(),
                    resources: resources.clone(),
                },
            );
        }
        Ok(resources)
    }

    /// Read one resource; ids that are not FHIR logical ids never reach the server
    pub async fn read(&self, resource_type: &str, id: &str) -> FhirResult<Option<Value>> {
        if !is_valid_id(id) {
            tracing::debug!(resource_type, id, "Refusing to read malformed resource id");
            return Ok(None);
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FhirError::InvalidQuery(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .push(resource_type)
            .push(id);

        let Some(value) = self.get_json(url.clone()).await? else {
            return Ok(None);
        };
        let resource = Resource::from_json(&value)
            .map_err(|e| FhirError::InvalidResource(format!("{}: {}", url, e)))?;
        if !resource.is_a(resource_type, id) {
            return Err(FhirError::InvalidResource(format!(
                "{} returned {}",
                url,
                resource.reference().unwrap_or(resource.resource_type)
            )));
        }
        if let Some(version) = resource.meta.as_ref().and_then(|m| m.version_id.as_deref()) {
            tracing::debug!(url = %url, version, "Read FHIR resource");
        }
        Ok(Some(value))
    }
}

pub enum FhirSource {
    Remote(FhirClient),
    /// Resources from a local searchset bundle; search parameters are ignored
    Fixture(Vec<Value>),
}

impl FhirSource {
    /// Fixture bundle when configured, otherwise the remote server; `None` when neither is set
    pub fn from_settings(settings: &FhirSettings) -> FhirResult<Option<Self>> {
        if let Some(path) = &settings.fixture_bundle {
            return Self::load_fixture(path).map(Some);
        }
        match &settings.base_url {
            Some(url) => Ok(Some(FhirSource::Remote(FhirClient::new(url, settings)?))),
            None => Ok(None),
        }
    }

    pub fn load_fixture(path: impl AsRef<Path>) -> FhirResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let bundle: Value = serde_json::from_str(&content)?;
        if bundle.get("resourceType").and_then(|t| t.as_str()) != Some("Bundle") {
            return Err(FhirError::InvalidBundle(format!(
                "{} is not a Bundle",
                path.as_ref().display()
            )));
        }
        let resources = bundle_resources(&bundle);
        tracing::info!(
            path = %path.as_ref().display(),
            count = resources.len(),
            "Loaded fixture bundle"
        );
        Ok(FhirSource::Fixture(resources))
    }

    pub async fn search(&self, source: &DataSource, refresh: bool) -> FhirResult<Arc<Vec<Value>>> {
        match self {
            FhirSource::Remote(client) => client.search(source, refresh).await,
            FhirSource::Fixture(resources) => {
                let resource_type = source.resource_type.as_str();
                Ok(Arc::new(
                    resources
                        .iter()
                        .filter(|r| r.get("resourceType").and_then(|t| t.as_str()) == Some(resource_type))
                        .cloned()
                        .collect(),
                ))
            }
        }
    }

    pub async fn read(&self, resource_type: &str, id: &str) -> FhirResult<Option<Value>> {
        match self {
            FhirSource::Remote(client) => client.read(resource_type, id).await,
            FhirSource::Fixture(_) if !is_valid_id(id) => Ok(None),
            FhirSource::Fixture(resources) => Ok(resources
                .iter()
                .find(|r| {
                    r.get("resourceType").and_then(|t| t.as_str()) == Some(resource_type)
                        && r.get("id").and_then(|i| i.as_str()) == Some(id)
                })
                .cloned()),
        }
    }
}
