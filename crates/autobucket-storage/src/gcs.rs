//! Google Cloud Storage through the JSON API
//!
//! Talks to `https://storage.googleapis.com/storage/v1` (or an override such
//! as a local emulator) with `reqwest`. Authentication is either a fixed
//! bearer token or an access token from the GCE/GKE metadata server.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{ObjectPage, ObjectStorageApi, StorageError};

/// Public GCS endpoint
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cached tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

// ============================================================================
// Credentials
// ============================================================================

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Access token with its refresh deadline
#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(value: String, expires_in: Duration, now: Instant) -> Self {
        Self {
            value,
            refresh_at: now + expires_in.saturating_sub(TOKEN_REFRESH_MARGIN),
        }
    }

    fn fresh_at(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

/// Source of bearer tokens for GCS requests
pub enum GcsAuth {
    /// Fixed token, e.g. from `gcloud auth print-access-token`
    Static(String),
    /// Default service account of the node or Workload Identity
    MetadataServer {
        /// Last token fetched
        cache: RwLock<Option<CachedToken>>,
    },
    /// No Authorization header (local emulators)
    Anonymous,
}

impl GcsAuth {
    /// Token from the metadata server, cached until shortly before expiry
    pub fn metadata_server() -> Self {
        Self::MetadataServer {
            cache: RwLock::new(None),
        }
    }

    async fn token(&self, http: &reqwest::Client) -> Result<Option<String>, StorageError> {
        match self {
            Self::Static(token) => Ok(Some(token.clone())),
            Self::Anonymous => Ok(None),
            Self::MetadataServer { cache } => {
                if let Some(token) = cache.read().as_ref().filter(|t| t.fresh_at(Instant::now())) {
                    return Ok(Some(token.value.clone()));
                }

                let fetched = fetch_metadata_token(http).await?;
                let token = CachedToken::new(
                    fetched.access_token,
                    Duration::from_secs(fetched.expires_in),
                    Instant::now(),
                );
                let value = token.value.clone();
                *cache.write() = Some(token);
                debug!(expires_in = fetched.expires_in, "Refreshed GCS access token");
                Ok(Some(value))
            }
        }
    }
}

impl std::fmt::Debug for GcsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(<redacted>)"),
            Self::MetadataServer { .. } => f.write_str("MetadataServer"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

async fn fetch_metadata_token(http: &reqwest::Client) -> Result<MetadataToken, StorageError> {
    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| StorageError::Credentials(format!("metadata token request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::Credentials(format!(
            "metadata token request failed (status={status}): {body}"
        )));
    }

    response.json().await.map_err(|e| StorageError::Malformed {
        operation: "metadata token",
        message: e.to_string(),
    })
}

// ============================================================================
// JSON API client
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

impl From<ListObjectsResponse> for ObjectPage {
    fn from(resp: ListObjectsResponse) -> Self {
        Self {
            names: resp.items.into_iter().map(|o| o.name).collect(),
            next_page_token: resp.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

/// [`ObjectStorageApi`] for Google Cloud Storage
#[derive(Debug)]
pub struct GcsJsonApi {
    http: reqwest::Client,
    base: Url,
    project: String,
    auth: GcsAuth,
}

impl GcsJsonApi {
    /// Client for `endpoint` that creates buckets in `project`
    pub fn new(endpoint: &str, project: &str, auth: GcsAuth) -> Result<Self, StorageError> {
        if project.is_empty() {
            return Err(StorageError::Config(
                "a GCP project is required to create buckets".to_string(),
            ));
        }
        let base = Url::parse(&format!("{}/storage/v1/", endpoint.trim_end_matches('/')))
            .map_err(|e| StorageError::Config(format!("invalid GCS endpoint {endpoint:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            project: project.to_string(),
            auth,
        })
    }

    /// Base URL joined with percent-encoded path segments
    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Config(format!("GCS endpoint {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StorageError> {
        let builder = self.http.request(method, url);
        Ok(match self.auth.token(&self.http).await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response, StorageError> {
        builder
            .send()
            .await
            .map_err(|e| StorageError::http(operation, e))
    }
}

async fn unexpected(operation: &'static str, bucket: &str, response: Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Status {
        operation,
        bucket: bucket.to_string(),
        status,
        body,
    }
}

#[async_trait]
impl ObjectStorageApi for GcsJsonApi {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        const OP: &str = "get bucket";
        let req = self.request(Method::GET, self.url(&["b", bucket])?).await?;
        let response = self.send(OP, req).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(unexpected(OP, bucket, response).await),
        }
    }

    async fn insert_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        const OP: &str = "insert bucket";
        let mut url = self.url(&["b"])?;
        url.query_pairs_mut().append_pair("project", &self.project);
        let req = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "name": bucket }));
        let response = self.send(OP, req).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                // 409 also means the name is taken by another project
                let body = response.text().await.unwrap_or_default();
                debug!(bucket, %body, "Bucket insert conflicted, checking it is ours");
                if self.bucket_exists(bucket).await? {
                    Ok(())
                } else {
                    Err(StorageError::Status {
                        operation: OP,
                        bucket: bucket.to_string(),
                        status: StatusCode::CONFLICT.as_u16(),
                        body,
                    })
                }
            }
            _ => Err(unexpected(OP, bucket, response).await),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, StorageError> {
        const OP: &str = "list objects";
        let mut url = self.url(&["b", bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fields", "items(name),nextPageToken");
            if let Some(token) = &page_token {
                query.append_pair("pageToken", token);
            }
        }
        let response = self.send(OP, self.request(Method::GET, url).await?).await?;
        match response.status() {
            s if s.is_success() => {
                let body: ListObjectsResponse =
                    response.json().await.map_err(|e| StorageError::Malformed {
                        operation: OP,
                        message: e.to_string(),
                    })?;
                Ok(body.into())
            }
            StatusCode::NOT_FOUND => Ok(ObjectPage::default()),
            _ => Err(unexpected(OP, bucket, response).await),
        }
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StorageError> {
        const OP: &str = "delete object";
        let url = self.url(&["b", bucket, "o", object])?;
        let response = self.send(OP, self.request(Method::DELETE, url).await?).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(unexpected(OP, bucket, response).await),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        const OP: &str = "delete bucket";
        let url = self.url(&["b", bucket])?;
        let response = self.send(OP, self.request(Method::DELETE, url).await?).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(unexpected(OP, bucket, response).await),
        }
    }
}
