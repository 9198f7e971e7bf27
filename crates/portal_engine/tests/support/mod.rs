#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

use portal_core::{FileToUpload, Fingerprint, JobHandle, PreviewChunk, ValidationResult, XmlError};
use portal_engine::{
    ApiError, CancelResponse, ChunkSink, ConvertConfig, FileList, ImportConfig, OaiPmhConfig,
    PortalApi, ResourceSyncConfig, UploadHandle,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(portal_logging::initialize_for_tests);
}

#[derive(Default)]
pub struct CollectingSink {
    chunks: Mutex<Vec<PreviewChunk>>,
}

impl CollectingSink {
    pub fn chunks(&self) -> Vec<PreviewChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        self.chunks().iter().map(|chunk| chunk.text.as_str()).collect()
    }
}

impl ChunkSink for CollectingSink {
    fn emit(&self, chunk: PreviewChunk) {
        self.chunks.lock().unwrap().push(chunk);
    }
}

/// In-memory portal: answers from tables the test fills in.
#[derive(Default)]
pub struct FakeApi {
    pub file_urls: Mutex<HashMap<String, String>>,
    pub convert_base: Mutex<String>,
    pub errors_by_path: Mutex<HashMap<String, Vec<XmlError>>>,
    pub validate_calls: AtomicUsize,
    pub presigned_base: Mutex<String>,
    pub handles_issued: Mutex<Vec<String>>,
    pub cancel_ok: AtomicBool,
    pub cancelled: Mutex<Vec<String>>,
    pub cancel_urls: Mutex<Vec<Option<String>>>,
}

impl FakeApi {
    pub fn with_file(self, key: &str, url: &str) -> Self {
        self.file_urls
            .lock()
            .unwrap()
            .insert(key.to_string(), url.to_string());
        self
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PortalApi for FakeApi {
    async fn list_files(
        &self,
        _stage: &str,
        _prefix: &str,
        _after: Option<&str>,
    ) -> Result<FileList, ApiError> {
        Ok(FileList::default())
    }

    async fn file_urls(
        &self,
        _stage: &str,
        paths: &[String],
    ) -> Result<HashMap<String, String>, ApiError> {
        let known = self.file_urls.lock().unwrap();
        Ok(paths
            .iter()
            .filter_map(|path| known.get(path).map(|url| (path.clone(), url.clone())))
            .collect())
    }

    fn convert_file_url(&self, _stage: &str, key: &str) -> Result<String, ApiError> {
        Ok(format!("{}/{key}", self.convert_base.lock().unwrap()))
    }

    async fn validate_files(
        &self,
        _stage: &str,
        files: &BTreeMap<Fingerprint, String>,
    ) -> Result<Vec<ValidationResult>, ApiError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let errors = self.errors_by_path.lock().unwrap();
        Ok(files
            .iter()
            .map(|(fingerprint, path)| ValidationResult {
                fingerprint: fingerprint.clone(),
                errors: errors.get(path).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn upload_handle(
        &self,
        _stage: &str,
        file: &FileToUpload,
    ) -> Result<UploadHandle, ApiError> {
        self.handles_issued.lock().unwrap().push(file.name.clone());
        Ok(UploadHandle {
            presigned_url: format!("{}/{}", self.presigned_base.lock().unwrap(), file.name),
        })
    }

    async fn ingest_files(
        &self,
        _paths: &[String],
        _config: &ImportConfig,
        _commit: bool,
    ) -> Result<JobHandle, ApiError> {
        Err(not_used())
    }

    async fn convert_files(
        &self,
        _key: Option<&str>,
        _config: &ConvertConfig,
    ) -> Result<JobHandle, ApiError> {
        Err(not_used())
    }

    async fn harvest(
        &self,
        _config: &OaiPmhConfig,
        _from_last: bool,
    ) -> Result<JobHandle, ApiError> {
        Err(not_used())
    }

    async fn sync(&self, _config: &ResourceSyncConfig) -> Result<JobHandle, ApiError> {
        Err(not_used())
    }

    async fn cancel_job(
        &self,
        job_id: &str,
        cancel_url: Option<&str>,
    ) -> Result<CancelResponse, ApiError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        self.cancel_urls
            .lock()
            .unwrap()
            .push(cancel_url.map(str::to_string));
        Ok(CancelResponse {
            ok: self.cancel_ok.load(Ordering::SeqCst),
        })
    }
}

fn not_used() -> ApiError {
    ApiError::Status {
        status: 501,
        message: "not used".to_string(),
    }
}
