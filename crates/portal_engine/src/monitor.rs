use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use portal_core::{
    JobCategory, JobEffect, JobHandle, JobMonitor, JobMsg, MonitorUrlTemplate, QueryState,
    Sentinels, WorkerEvent, WorkerRequest,
};
use portal_logging::{portal_debug, portal_info, portal_warn};

use crate::api::PortalApi;
use crate::worker::WorkerHandle;

/// The page location whose query string carries job ids.
pub trait Location: Send + Sync {
    fn query(&self) -> String;
    fn replace_query(&self, query: &str);
}

#[derive(Debug, Default)]
pub struct MemoryLocation {
    query: Mutex<String>,
}

impl MemoryLocation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Mutex::new(query.into()),
        }
    }
}

impl Location for MemoryLocation {
    fn query(&self) -> String {
        self.query
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_query(&self, query: &str) {
        *self
            .query
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = query.to_string();
    }
}

/// Drives a [`JobMonitor`] over the worker's job relays and keeps the
/// location's query string in step with it.
pub struct JobMonitorController {
    monitor: JobMonitor,
    sentinels: Sentinels,
    worker: WorkerHandle,
    api: Arc<dyn PortalApi>,
    location: Arc<dyn Location>,
}

impl JobMonitorController {
    /// Build the controller and pick up a job id left in the location by an
    /// earlier session.
    pub async fn resume(
        category: JobCategory,
        sentinels: Sentinels,
        template: &MonitorUrlTemplate,
        worker: WorkerHandle,
        api: Arc<dyn PortalApi>,
        location: Arc<dyn Location>,
    ) -> Self {
        let query = QueryState::parse(&location.query());
        let (monitor, effects) = JobMonitor::resume(category, sentinels.clone(), &query, template);
        if let Some(handle) = monitor.handle() {
            portal_info!("Resuming {category} job {}", handle.job_id);
        }
        let mut controller = Self {
            monitor,
            sentinels,
            worker,
            api,
            location,
        };
        controller.execute(effects).await;
        controller
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    pub async fn start(&mut self, handle: JobHandle) {
        self.apply(JobMsg::Start(handle)).await;
    }

    pub async fn cancel(&mut self) {
        self.apply(JobMsg::CancelRequested).await;
    }

    /// Apply relay events already queued; returns how many were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.worker.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Apply relay events until the transport is no longer being watched.
    pub async fn wait_until_settled(&mut self) {
        while self.monitor.is_monitoring() {
            match self.worker.recv().await {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        let msg = match event {
            WorkerEvent::JobOpened { id } => JobMsg::TransportOpened { monitor: id },
            WorkerEvent::JobLine { id, msg, .. } => JobMsg::Line {
                monitor: id,
                text: msg,
            },
            WorkerEvent::JobError { id, message } => JobMsg::TransportError {
                monitor: id,
                message,
            },
            WorkerEvent::JobClosed { id } => JobMsg::TransportClosed { monitor: id },
            other => {
                portal_debug!("Job monitor ignoring {other:?}");
                return;
            }
        };
        self.apply(msg).await;
    }

    async fn apply(&mut self, msg: JobMsg) {
        let effects = self.monitor.update(msg);
        self.execute(effects).await;
    }

    async fn execute(&mut self, effects: Vec<JobEffect>) {
        let mut pending = VecDeque::from(effects);
        while let Some(effect) = pending.pop_front() {
            if let Some(follow_up) = self.run(effect).await {
                pending.extend(self.monitor.update(follow_up));
            }
        }
    }

    async fn run(&mut self, effect: JobEffect) -> Option<JobMsg> {
        match effect {
            JobEffect::OpenTransport { monitor, url } => {
                self.worker.post(WorkerRequest::Monitor {
                    id: monitor,
                    url,
                    sentinels: self.sentinels.clone(),
                });
                None
            }
            JobEffect::CloseTransport { monitor } => {
                self.worker.post(WorkerRequest::CloseMonitor { id: monitor });
                None
            }
            JobEffect::SetUrlParam { key, value } => {
                self.edit_query(|query| query.set(key, &value));
                None
            }
            JobEffect::RemoveUrlParam { key } => {
                self.edit_query(|query| query.remove(key));
                None
            }
            JobEffect::RequestCancel { job_id, cancel_url } => {
                let ok = match self.api.cancel_job(&job_id, cancel_url.as_deref()).await {
                    Ok(response) => response.ok,
                    Err(err) => {
                        portal_warn!("Cancelling job {job_id} failed: {err}");
                        false
                    }
                };
                Some(JobMsg::CancelAcknowledged { job_id, ok })
            }
        }
    }

    fn edit_query(&self, edit: impl FnOnce(&mut QueryState)) {
        let mut query = QueryState::parse(&self.location.query());
        edit(&mut query);
        self.location.replace_query(&query.to_query_string());
    }
}

#[cfg(test)]
mod tests {
    use super::{Location, MemoryLocation};

    #[test]
    fn memory_location_replaces_the_query() {
        let location = MemoryLocation::new("?tab=ingest");
        assert_eq!(location.query(), "?tab=ingest");
        location.replace_query("");
        assert_eq!(location.query(), "");
    }
}
