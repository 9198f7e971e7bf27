use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use portal_core::{
    accept_files, progress_percent, FileToUpload, NoValidFiles, UploadQueue, UploadSummary,
};
use portal_logging::{portal_debug, portal_error, portal_info};
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

use crate::api::PortalApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The item left the queue before or during its transfer.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    NoValidFiles(#[from] NoValidFiles),
    #[error("{file} is already queued for upload")]
    AlreadyQueued { file: String },
    #[error("upload of {file} failed: {message}")]
    Failed { file: String, message: String },
}

/// Reports `(loaded, total)` bytes; returning `false` aborts the transfer.
pub type ProgressFn = Box<dyn FnMut(u64, u64) -> bool + Send>;

/// Upload `items` strictly one after another.
///
/// `still_queued` is checked right before each item; items no longer queued
/// are counted as cancelled without calling `upload_fn`. The first error
/// stops the batch; uploads that already finished stay uploaded.
pub async fn run_sequential<T, Q, F, Fut>(
    items: Vec<T>,
    still_queued: Q,
    mut upload_fn: F,
) -> Result<UploadSummary, UploadError>
where
    Q: Fn(&T) -> bool,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<UploadOutcome, UploadError>>,
{
    let mut summary = UploadSummary::default();
    for item in items {
        if !still_queued(&item) {
            summary.cancelled += 1;
            continue;
        }
        match upload_fn(item).await? {
            UploadOutcome::Uploaded => summary.done += 1,
            UploadOutcome::Cancelled => summary.cancelled += 1,
        }
    }
    Ok(summary)
}

/// A file picked for upload together with its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub file: FileToUpload,
    pub data: Bytes,
}

impl UploadItem {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        let size = data.len() as u64;
        Self {
            file: FileToUpload::new(name, content_type, size),
            data,
        }
    }
}

#[async_trait::async_trait]
pub trait UploadTransport: Send + Sync {
    async fn put(
        &self,
        url: &str,
        item: &UploadItem,
        progress: ProgressFn,
    ) -> Result<UploadOutcome, UploadError>;
}

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// PUTs raw bytes to a pre-signed URL, streaming the body so progress can
/// be observed and the transfer aborted between chunks.
#[derive(Debug, Clone)]
pub struct ReqwestUploadTransport {
    chunk_bytes: usize,
}

impl Default for ReqwestUploadTransport {
    fn default() -> Self {
        Self {
            chunk_bytes: UPLOAD_CHUNK_BYTES,
        }
    }
}

impl ReqwestUploadTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }
}

#[async_trait::async_trait]
impl UploadTransport for ReqwestUploadTransport {
    async fn put(
        &self,
        url: &str,
        item: &UploadItem,
        progress: ProgressFn,
    ) -> Result<UploadOutcome, UploadError> {
        let failed = |message: String| UploadError::Failed {
            file: item.file.name.clone(),
            message,
        };
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| failed(err.to_string()))?;

        let total = item.data.len() as u64;
        let chunks: Vec<Bytes> = (0..item.data.len())
            .step_by(self.chunk_bytes)
            .map(|start| {
                let end = (start + self.chunk_bytes).min(item.data.len());
                item.data.slice(start..end)
            })
            .collect();
        let cancel = CancellationToken::new();
        let body_cancel = cancel.clone();
        let progress = Arc::new(Mutex::new(progress));
        let mut loaded = 0u64;
        let body = stream::iter(chunks).map(move |chunk| {
            loaded += chunk.len() as u64;
            let keep_going = {
                let mut report = progress.lock().unwrap_or_else(PoisonError::into_inner);
                (*report)(loaded, total)
            };
            if keep_going {
                Ok(chunk)
            } else {
                body_cancel.cancel();
                Err(std::io::Error::other("upload cancelled"))
            }
        });

        let result = client
            .put(url)
            .header(CONTENT_TYPE, item.file.content_type.as_str())
            .header(CACHE_CONTROL, "120")
            .header("x-amz-meta-source", "user")
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await;

        if cancel.is_cancelled() {
            portal_debug!("Request cancelled: {}", item.file.name);
            return Ok(UploadOutcome::Cancelled);
        }
        let response = result.map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(status.to_string()));
        }
        Ok(UploadOutcome::Uploaded)
    }
}

fn lock(queue: &Mutex<UploadQueue>) -> MutexGuard<'_, UploadQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Upload stage of a dataset: queue bookkeeping plus the sequential
/// handle-then-PUT transfer of every queued file.
pub struct UploadPipeline {
    api: Arc<dyn PortalApi>,
    transport: Arc<dyn UploadTransport>,
    queue: Arc<Mutex<UploadQueue>>,
    stage: String,
    removal_delay: Duration,
}

impl UploadPipeline {
    pub fn new(
        api: Arc<dyn PortalApi>,
        transport: Arc<dyn UploadTransport>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            api,
            transport,
            queue: Arc::new(Mutex::new(UploadQueue::new())),
            stage: stage.into(),
            removal_delay: Duration::from_secs(1),
        }
    }

    /// Delay before a finished row leaves the visible list.
    pub fn with_removal_delay(mut self, delay: Duration) -> Self {
        self.removal_delay = delay;
        self
    }

    /// Shared progress list. Removing an entry cancels that upload.
    pub fn queue(&self) -> Arc<Mutex<UploadQueue>> {
        self.queue.clone()
    }

    pub fn cancel_all(&self) {
        lock(&self.queue).cancel_all();
    }

    pub async fn upload_files(&self, items: Vec<UploadItem>) -> Result<UploadSummary, UploadError> {
        let offered: Vec<FileToUpload> = items.iter().map(|item| item.file.clone()).collect();
        let accepted = accept_files(offered)?;
        let items: Vec<UploadItem> = items
            .into_iter()
            .filter(|item| accepted.contains(&item.file))
            .collect();
        {
            // Rows are keyed by name; a second upload under the same name would
            // share the first one's row and be pruned with it.
            let mut queue = lock(&self.queue);
            let mut seen = HashSet::new();
            for item in &items {
                let name = item.file.name.as_str();
                if !seen.insert(name) || queue.is_active(name) {
                    let err = UploadError::AlreadyQueued {
                        file: name.to_string(),
                    };
                    portal_error!("{err}");
                    return Err(err);
                }
            }
            for item in &items {
                queue.enqueue(item.file.clone());
            }
        }

        let result = run_sequential(
            items,
            |item| lock(&self.queue).is_active(&item.file.name),
            |item| self.upload_file(item),
        )
        .await;
        match &result {
            Ok(summary) => portal_info!("{summary}"),
            Err(err) => portal_error!("{err}"),
        }
        result
    }

    pub async fn upload_file(&self, item: UploadItem) -> Result<UploadOutcome, UploadError> {
        let handle = self
            .api
            .upload_handle(&self.stage, &item.file)
            .await
            .map_err(|err| UploadError::Failed {
                file: item.file.name.clone(),
                message: err.to_string(),
            })?;

        let queue = self.queue.clone();
        let name = item.file.name.clone();
        let progress: ProgressFn = Box::new(move |loaded, total| {
            let mut queue = lock(&queue);
            match progress_percent(loaded, total) {
                Some(percent) => queue.set_progress(&name, percent),
                None => queue.contains(&name),
            }
        });

        let outcome = self
            .transport
            .put(&handle.presigned_url, &item, progress)
            .await?;
        match outcome {
            UploadOutcome::Uploaded => self.finish(&item.file.name),
            UploadOutcome::Cancelled => portal_debug!("Upload of {} cancelled", item.file.name),
        }
        Ok(outcome)
    }

    fn finish(&self, name: &str) {
        lock(&self.queue).finish(name);
        if self.removal_delay.is_zero() {
            lock(&self.queue).prune_finished();
            return;
        }
        let queue = self.queue.clone();
        let delay = self.removal_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&queue).prune_finished();
        });
    }
}
