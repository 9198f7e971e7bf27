use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use portal_core::{
    FileMeta, PreviewEffect, PreviewError, PreviewKind, PreviewMsg, PreviewPane, RequestId,
    WorkerEvent, WorkerRequest,
};
use portal_logging::{portal_debug, portal_warn};

use crate::api::PortalApi;
use crate::pretty::pretty_print_xml;
use crate::worker::WorkerHandle;

/// Drives one [`PreviewPane`]: runs its effects against the worker and the
/// portal API and feeds the results back in.
pub struct PreviewController {
    pane: PreviewPane,
    worker: WorkerHandle,
    api: Arc<dyn PortalApi>,
    stage: String,
}

impl PreviewController {
    pub fn new(
        pane: PreviewPane,
        worker: WorkerHandle,
        api: Arc<dyn PortalApi>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            pane,
            worker,
            api,
            stage: stage.into(),
        }
    }

    pub fn pane(&self) -> &PreviewPane {
        &self.pane
    }

    pub async fn set_target(&mut self, file: Option<FileMeta>) {
        self.apply(PreviewMsg::TargetSelected(file)).await;
    }

    pub async fn set_mappings(&mut self, mappings: Vec<(String, String)>) {
        self.apply(PreviewMsg::MappingsChanged(mappings)).await;
    }

    pub async fn validate(&mut self) {
        self.apply(PreviewMsg::ValidateRequested).await;
    }

    pub async fn toggle_pretty_print(&mut self) {
        self.apply(PreviewMsg::PrettyPrintToggled).await;
    }

    /// Apply worker events already queued; returns how many were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.worker.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Wait until the current load has finished, failed, or was replaced.
    pub async fn settle(&mut self) {
        while self.pane.phase().is_in_flight() {
            match self.worker.recv().await {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Chunk { id, chunk } => {
                self.apply(PreviewMsg::ChunkReceived { id, chunk }).await
            }
            WorkerEvent::Error { id, error } => {
                self.apply(PreviewMsg::LoadFailed { id, error }).await
            }
            other => portal_debug!("Preview controller ignoring {other:?}"),
        }
    }

    async fn apply(&mut self, msg: PreviewMsg) {
        let mut pending = VecDeque::from([msg]);
        while let Some(msg) = pending.pop_front() {
            for effect in self.pane.update(msg) {
                if let Some(follow_up) = self.run(effect).await {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    async fn run(&mut self, effect: PreviewEffect) -> Option<PreviewMsg> {
        match effect {
            PreviewEffect::StartLoad {
                id,
                file,
                kind,
                max_bytes,
            } => match self.request_for(id, &file, kind, max_bytes).await {
                Ok(request) => {
                    self.worker.post(request);
                    None
                }
                Err(error) => Some(PreviewMsg::LoadFailed { id, error }),
            },
            PreviewEffect::AbortLoad { id } => {
                self.worker.post(WorkerRequest::Abort { id });
                None
            }
            PreviewEffect::Validate { fingerprint, path } => {
                let files = BTreeMap::from([(fingerprint.clone(), path)]);
                match self.api.validate_files(&self.stage, &files).await {
                    Ok(results) => results
                        .into_iter()
                        .find(|result| result.fingerprint == fingerprint)
                        .map(PreviewMsg::ValidationCompleted),
                    Err(err) => {
                        portal_warn!("Validation failed: {err}");
                        Some(PreviewMsg::ValidationFailed {
                            fingerprint,
                            message: err.to_string(),
                        })
                    }
                }
            }
            PreviewEffect::PrettyPrint { id, text } => Some(PreviewMsg::PrettyPrinted {
                id,
                result: pretty_print_xml(&text).map_err(PreviewError::from),
            }),
        }
    }

    async fn request_for(
        &self,
        id: RequestId,
        file: &FileMeta,
        kind: PreviewKind,
        max_bytes: Option<u64>,
    ) -> Result<WorkerRequest, PreviewError> {
        match kind {
            PreviewKind::File => {
                let urls = self
                    .api
                    .file_urls(&self.stage, std::slice::from_ref(&file.key))
                    .await
                    .map_err(|err| PreviewError::new(err.to_string()))?;
                let url = urls
                    .get(&file.key)
                    .cloned()
                    .ok_or_else(|| PreviewError::new("Unable to load preview URL"))?;
                Ok(WorkerRequest::Preview {
                    id,
                    url,
                    max_bytes,
                    content_type: file.content_type.clone(),
                })
            }
            PreviewKind::Convert { mappings } => {
                let url = self
                    .api
                    .convert_file_url(&self.stage, &file.key)
                    .map_err(|err| PreviewError::new(err.to_string()))?;
                Ok(WorkerRequest::ConvertPreview {
                    id,
                    url,
                    mappings,
                    max_bytes,
                })
            }
        }
    }
}
