use std::collections::{BTreeMap, HashMap};

use portal_core::{FileMeta, FileToUpload, Fingerprint, JobHandle, ValidationResult, XmlError};
use portal_logging::portal_debug;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("{status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// One page of a stage listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileMeta>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConfig {
    #[serde(default)]
    pub allow_updates: bool,
    #[serde(default)]
    pub use_source_id: bool,
    #[serde(default)]
    pub tolerant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_lang: Option<String>,
    pub log_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl ImportConfig {
    pub fn new(log_message: impl Into<String>) -> Self {
        Self {
            allow_updates: false,
            use_source_id: false,
            tolerant: false,
            properties: None,
            default_lang: None,
            log_message: log_message.into(),
            comments: None,
        }
    }
}

/// Transformation chain applied by a convert job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub mappings: Vec<(String, String)>,
    #[serde(default)]
    pub force: bool,
}

/// OAI-PMH endpoint harvested by a harvest job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaiPmhConfig {
    pub url: String,
    /// Metadata prefix, e.g. `ead`.
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
}

/// ResourceSync source mirrored by a sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSyncConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHandle {
    pub presigned_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
}

/// REST surface of the portal consumed by the controllers.
#[async_trait::async_trait]
pub trait PortalApi: Send + Sync {
    async fn list_files(
        &self,
        stage: &str,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<FileList, ApiError>;

    /// Download URLs keyed by file path.
    async fn file_urls(
        &self,
        stage: &str,
        paths: &[String],
    ) -> Result<HashMap<String, String>, ApiError>;

    /// URL of the transformation preview of one file; no request is made.
    fn convert_file_url(&self, stage: &str, key: &str) -> Result<String, ApiError>;

    /// Validate the given files. Every fingerprint asked for gets a result;
    /// files the server reports nothing for are valid.
    async fn validate_files(
        &self,
        stage: &str,
        files: &BTreeMap<Fingerprint, String>,
    ) -> Result<Vec<ValidationResult>, ApiError>;

    async fn upload_handle(&self, stage: &str, file: &FileToUpload)
        -> Result<UploadHandle, ApiError>;

    async fn ingest_files(
        &self,
        paths: &[String],
        config: &ImportConfig,
        commit: bool,
    ) -> Result<JobHandle, ApiError>;

    /// Convert one file, or the whole input stage when `key` is `None`.
    async fn convert_files(
        &self,
        key: Option<&str>,
        config: &ConvertConfig,
    ) -> Result<JobHandle, ApiError>;

    /// `from_last` harvests only records changed since the previous run.
    async fn harvest(&self, config: &OaiPmhConfig, from_last: bool)
        -> Result<JobHandle, ApiError>;

    async fn sync(&self, config: &ResourceSyncConfig) -> Result<JobHandle, ApiError>;

    /// Cancel a job at `cancel_url` when the job named one, else at the
    /// repository's job endpoint.
    async fn cancel_job(
        &self,
        job_id: &str,
        cancel_url: Option<&str>,
    ) -> Result<CancelResponse, ApiError>;
}

/// Endpoint layout of one dataset: `{base}/{repo}/{dataset}/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoutes {
    base: Url,
    repo_id: String,
    dataset_id: String,
}

impl ApiRoutes {
    pub fn new(base: &str, repo_id: &str, dataset_id: &str) -> Result<Self, ApiError> {
        let mut base = Url::parse(base).map_err(|err| ApiError::InvalidUrl(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            repo_id: repo_id.to_string(),
            dataset_id: dataset_id.to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn dataset(&self, rest: &[&str]) -> Result<Url, ApiError> {
        let mut segments = vec![self.repo_id.as_str(), self.dataset_id.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    pub fn list_files(&self, stage: &str) -> Result<Url, ApiError> {
        self.dataset(&["files", stage])
    }

    pub fn file_urls(&self, stage: &str) -> Result<Url, ApiError> {
        self.dataset(&["files", stage, "urls"])
    }

    pub fn validate_files(&self, stage: &str) -> Result<Url, ApiError> {
        self.dataset(&["files", stage, "validate"])
    }

    pub fn upload_handle(&self, stage: &str) -> Result<Url, ApiError> {
        self.dataset(&["files", stage, "upload"])
    }

    pub fn convert_file(&self, stage: &str, key: &str) -> Result<Url, ApiError> {
        let mut url = self.dataset(&["convert", stage])?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }

    pub fn ingest_files(&self) -> Result<Url, ApiError> {
        self.dataset(&["ingest"])
    }

    pub fn convert_files(&self, key: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.dataset(&["convert"])?;
        if let Some(key) = key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    pub fn harvest(&self, from_last: bool) -> Result<Url, ApiError> {
        let mut url = self.dataset(&["harvest"])?;
        url.query_pairs_mut()
            .append_pair("fromLast", if from_last { "true" } else { "false" });
        Ok(url)
    }

    pub fn sync(&self) -> Result<Url, ApiError> {
        self.dataset(&["sync"])
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<Url, ApiError> {
        self.url(&[self.repo_id.as_str(), "jobs", job_id])
    }
}

#[derive(Debug, Clone)]
pub struct HttpPortalApi {
    routes: ApiRoutes,
    client: reqwest::Client,
}

impl HttpPortalApi {
    pub fn new(routes: ApiRoutes) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        Ok(Self { routes, client })
    }

    pub fn routes(&self) -> &ApiRoutes {
        &self.routes
    }

    async fn call<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        portal_debug!("{method} {url}");
        let mut request = self
            .client
            .request(method, url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("ajax-ignore-csrf", "true")
            .header(ACCEPT, "application/json; charset=utf-8");
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|err| ApiError::Decode(err.to_string()))?;
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&bytes)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }
}

fn error_message(body: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|body| body.error)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireValidation {
    key: String,
    #[serde(default, rename = "eTag")]
    etag: Option<String>,
    #[serde(default)]
    errors: Vec<XmlError>,
}

/// Match server results to the fingerprints asked for, by eTag first and
/// path second. Fingerprints without a result validate clean.
fn collect_validation(
    files: &BTreeMap<Fingerprint, String>,
    wire: Vec<WireValidation>,
) -> Vec<ValidationResult> {
    let by_path: HashMap<&str, &Fingerprint> = files
        .iter()
        .map(|(fingerprint, path)| (path.as_str(), fingerprint))
        .collect();
    let mut found: BTreeMap<Fingerprint, Vec<XmlError>> = BTreeMap::new();
    for result in wire {
        let tagged = result
            .etag
            .as_deref()
            .map(Fingerprint::from_etag)
            .filter(|fingerprint| files.contains_key(fingerprint));
        let fingerprint = match tagged {
            Some(fingerprint) => fingerprint,
            None => match by_path.get(result.key.as_str()) {
                Some(fingerprint) => (*fingerprint).clone(),
                None => continue,
            },
        };
        found.entry(fingerprint).or_default().extend(result.errors);
    }
    files
        .keys()
        .map(|fingerprint| ValidationResult {
            fingerprint: fingerprint.clone(),
            errors: found.remove(fingerprint).unwrap_or_default(),
        })
        .collect()
}

#[async_trait::async_trait]
impl PortalApi for HttpPortalApi {
    async fn list_files(
        &self,
        stage: &str,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<FileList, ApiError> {
        let mut url = self.routes.list_files(stage)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(after) = after {
                query.append_pair("after", after);
            }
        }
        self.call::<(), _>(Method::GET, url, None).await
    }

    async fn file_urls(
        &self,
        stage: &str,
        paths: &[String],
    ) -> Result<HashMap<String, String>, ApiError> {
        let url = self.routes.file_urls(stage)?;
        self.call(Method::POST, url, Some(paths)).await
    }

    fn convert_file_url(&self, stage: &str, key: &str) -> Result<String, ApiError> {
        Ok(self.routes.convert_file(stage, key)?.to_string())
    }

    async fn validate_files(
        &self,
        stage: &str,
        files: &BTreeMap<Fingerprint, String>,
    ) -> Result<Vec<ValidationResult>, ApiError> {
        let url = self.routes.validate_files(stage)?;
        let wire: Vec<WireValidation> = self.call(Method::POST, url, Some(files)).await?;
        Ok(collect_validation(files, wire))
    }

    async fn upload_handle(
        &self,
        stage: &str,
        file: &FileToUpload,
    ) -> Result<UploadHandle, ApiError> {
        let url = self.routes.upload_handle(stage)?;
        self.call(Method::POST, url, Some(file)).await
    }

    async fn ingest_files(
        &self,
        paths: &[String],
        config: &ImportConfig,
        commit: bool,
    ) -> Result<JobHandle, ApiError> {
        #[derive(Serialize)]
        struct IngestRequest<'a> {
            config: &'a ImportConfig,
            commit: bool,
            files: &'a [String],
        }
        let url = self.routes.ingest_files()?;
        let body = IngestRequest {
            config,
            commit,
            files: paths,
        };
        self.call(Method::POST, url, Some(&body)).await
    }

    async fn convert_files(
        &self,
        key: Option<&str>,
        config: &ConvertConfig,
    ) -> Result<JobHandle, ApiError> {
        let url = self.routes.convert_files(key)?;
        self.call(Method::POST, url, Some(config)).await
    }

    async fn harvest(
        &self,
        config: &OaiPmhConfig,
        from_last: bool,
    ) -> Result<JobHandle, ApiError> {
        let url = self.routes.harvest(from_last)?;
        self.call(Method::POST, url, Some(config)).await
    }

    async fn sync(&self, config: &ResourceSyncConfig) -> Result<JobHandle, ApiError> {
        let url = self.routes.sync()?;
        self.call(Method::POST, url, Some(config)).await
    }

    async fn cancel_job(
        &self,
        job_id: &str,
        cancel_url: Option<&str>,
    ) -> Result<CancelResponse, ApiError> {
        let url = match cancel_url {
            Some(url) => Url::parse(url).map_err(|err| ApiError::InvalidUrl(err.to_string()))?,
            None => self.routes.cancel_job(job_id)?,
        };
        self.call::<(), _>(Method::DELETE, url, None).await
    }
}
