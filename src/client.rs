//! Remote collection store client and the [`CollectionClient`] trait.
//!
//! The store is a paginated, key-ordered HTTP API. Each collection exposes a
//! fetch endpoint returning records ascending by key, and a project-level
//! listing endpoint enumerating the collections that exist.
//!
//! The trait is the seam for tests: the scanner is written against
//! [`CollectionClient`] and exercised with an in-memory fake.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{CollectionEntry, Record};

/// Default store endpoint, overridable via
/// [`ScannerConfig::endpoint`](crate::ScannerConfig::endpoint).
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

/// Parameters for a single fetch call against one physical collection.
#[derive(Debug, Clone, Default)]
pub struct FetchParams {
    /// Maximum number of records to return. Required, must be positive.
    pub count: usize,
    /// Return records with key strictly greater than this.
    pub startafter: Option<String>,
    /// Server-side seek: return records with key at or after this. The store
    /// nullifies `startafter` when `start` is given.
    pub start: Option<String>,
    /// Include only records whose key matches one of these prefixes.
    pub prefix: Vec<String>,
    /// Meta fields to include in each record (`_key`, `_ts`).
    pub meta: Vec<String>,
    /// Only include records with timestamp `>= startts`.
    pub startts: Option<i64>,
    /// Only include records with timestamp `<= endts`.
    pub endts: Option<i64>,
    /// Omit data fields, returning meta fields only.
    pub nodata: bool,
}

impl FetchParams {
    /// Returns a copy with the per-call pagination fields replaced.
    pub fn paginate(&self, count: usize, startafter: Option<String>) -> Self {
        let mut params = self.clone();
        params.count = count;
        params.startafter = startafter;
        params
    }
}

/// Read access to a remote collection store.
///
/// Both operations are read-only and idempotent, so retrying a failed call
/// is always safe.
#[async_trait]
pub trait CollectionClient: Send + Sync {
    /// Fetches up to `params.count` records from a physical collection,
    /// ascending by key.
    async fn fetch(&self, collection: &str, params: &FetchParams) -> Result<Vec<Record>>;

    /// Lists the collections that exist in the project.
    async fn list_collections(&self) -> Result<Vec<CollectionEntry>>;
}

/// HTTP implementation of [`CollectionClient`].
///
/// Credentials are passed through as basic-auth with the API key as username;
/// no other authentication is performed.
pub struct HttpCollectionClient {
    http: reqwest::Client,
    endpoint: String,
    apikey: String,
    project_id: String,
}

impl HttpCollectionClient {
    /// Creates a client for the given endpoint, credentials and project.
    pub fn new(
        endpoint: impl Into<String>,
        apikey: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            apikey: apikey.into(),
            project_id: project_id.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.apikey, None::<&str>)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = message.chars().take(512).collect();
            return Err(Error::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl CollectionClient for HttpCollectionClient {
    async fn fetch(&self, collection: &str, params: &FetchParams) -> Result<Vec<Record>> {
        if params.count == 0 {
            return Err(Error::Config("fetch requires a positive count".into()));
        }

        let mut query = vec![("count", params.count.to_string())];
        if let Some(startafter) = &params.startafter {
            query.push(("startafter", startafter.clone()));
        }
        if let Some(start) = &params.start {
            query.push(("start", start.clone()));
        }
        for prefix in &params.prefix {
            query.push(("prefix", prefix.clone()));
        }
        for meta in &params.meta {
            query.push(("meta", meta.clone()));
        }
        if let Some(startts) = params.startts {
            query.push(("startts", startts.to_string()));
        }
        if let Some(endts) = params.endts {
            query.push(("endts", endts.to_string()));
        }
        if params.nodata {
            query.push(("nodata", "1".to_string()));
        }

        let url = format!(
            "{}/collections/{}/s/{}",
            self.endpoint, self.project_id, collection
        );
        self.get_json(url, &query).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionEntry>> {
        let url = format!("{}/collections/{}/list", self.endpoint, self.project_id);
        self.get_json(url, &[]).await
    }
}
