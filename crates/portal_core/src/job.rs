use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::{MonitorId, QueryState};

/// Kind of long-running server job. Each category owns one query key so
/// monitors of different categories can coexist on one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCategory {
    Ingest,
    Convert,
    Harvest,
    Sync,
}

impl JobCategory {
    pub const ALL: [JobCategory; 4] = [
        JobCategory::Ingest,
        JobCategory::Convert,
        JobCategory::Harvest,
        JobCategory::Sync,
    ];

    pub fn query_key(self) -> &'static str {
        match self {
            JobCategory::Ingest => "ingest-job-id",
            JobCategory::Convert => "convert-job-id",
            JobCategory::Harvest => "harvest-job-id",
            JobCategory::Sync => "sync-job-id",
        }
    }

    /// Prefix of repeated progress lines collapsed in the display projection.
    pub fn progress_prefix(self) -> Option<&'static str> {
        match self {
            JobCategory::Ingest => Some("Ingesting..."),
            _ => None,
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobCategory::Ingest => "ingest",
            JobCategory::Convert => "convert",
            JobCategory::Harvest => "harvest",
            JobCategory::Sync => "sync",
        };
        f.write_str(name)
    }
}

impl FromStr for JobCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobCategory::ALL
            .into_iter()
            .find(|category| category.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown job category {s:?}"))
    }
}

/// Substrings that end monitoring wherever they appear in a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinels {
    pub done: String,
    pub error: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            done: "Done".to_string(),
            error: "Error".to_string(),
        }
    }
}

impl Sentinels {
    /// Error wins when a line carries both sentinels.
    pub fn classify(&self, line: &str) -> Option<TerminalKind> {
        if !self.error.is_empty() && line.contains(&self.error) {
            Some(TerminalKind::Error)
        } else if !self.done.is_empty() && line.contains(&self.done) {
            Some(TerminalKind::Done)
        } else {
            None
        }
    }
}

/// Derives the transport URL of a job from its id, e.g.
/// `ws://host/admin/jobs/{jobId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorUrlTemplate(String);

impl MonitorUrlTemplate {
    pub const PLACEHOLDER: &'static str = "{jobId}";

    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn url_for(&self, job_id: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(job_id.as_bytes()).collect();
        self.0.replace(Self::PLACEHOLDER, &encoded)
    }
}

/// A server job being (or about to be) monitored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: String,
    #[serde(rename = "url")]
    pub monitor_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, monitor_url: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            monitor_url: monitor_url.into(),
            cancel_url: None,
        }
    }

    pub fn with_cancel_url(mut self, cancel_url: impl Into<String>) -> Self {
        self.cancel_url = Some(cancel_url.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Connecting,
    Active,
    Terminal(TerminalKind),
}

/// Append-only log of one job. Lines are never reordered or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobLog {
    lines: Vec<String>,
}

impl JobLog {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Projection for display: a run of consecutive lines starting with
    /// `progress_prefix` shows only its latest line.
    pub fn display_lines(&self, progress_prefix: Option<&str>) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let is_progress = progress_prefix.is_some_and(|p| line.starts_with(p));
            let last_is_progress = match (out.last(), progress_prefix) {
                (Some(last), Some(p)) => last.starts_with(p),
                _ => false,
            };
            if is_progress && last_is_progress {
                if let Some(last) = out.last_mut() {
                    *last = line.as_str();
                }
            } else {
                out.push(line.as_str());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMsg {
    /// Begin monitoring; replaces any current handle.
    Start(JobHandle),
    TransportOpened { monitor: MonitorId },
    Line { monitor: MonitorId, text: String },
    TransportError { monitor: MonitorId, message: String },
    TransportClosed { monitor: MonitorId },
    /// User asked to cancel the current job.
    CancelRequested,
    CancelAcknowledged { job_id: String, ok: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEffect {
    OpenTransport { monitor: MonitorId, url: String },
    CloseTransport { monitor: MonitorId },
    SetUrlParam { key: &'static str, value: String },
    RemoveUrlParam { key: &'static str },
    /// Ask the server to cancel; `cancel_url` overrides the default endpoint.
    RequestCancel {
        job_id: String,
        cancel_url: Option<String>,
    },
}

/// State machine of one job category's monitor.
#[derive(Debug, Clone)]
pub struct JobMonitor {
    category: JobCategory,
    sentinels: Sentinels,
    phase: JobPhase,
    handle: Option<JobHandle>,
    monitor: Option<MonitorId>,
    next_monitor: MonitorId,
    log: JobLog,
}

impl JobMonitor {
    pub fn new(category: JobCategory, sentinels: Sentinels) -> Self {
        Self {
            category,
            sentinels,
            phase: JobPhase::Idle,
            handle: None,
            monitor: None,
            next_monitor: 1,
            log: JobLog::default(),
        }
    }

    /// Build a monitor and, when the page query carries this category's job
    /// id, restart monitoring of that job.
    pub fn resume(
        category: JobCategory,
        sentinels: Sentinels,
        query: &QueryState,
        template: &MonitorUrlTemplate,
    ) -> (Self, Vec<JobEffect>) {
        let mut monitor = Self::new(category, sentinels);
        let effects = match query.get(category.query_key()) {
            Some(job_id) if !job_id.is_empty() => {
                let handle = JobHandle::new(job_id, template.url_for(job_id));
                monitor.update(JobMsg::Start(handle))
            }
            _ => Vec::new(),
        };
        (monitor, effects)
    }

    pub fn category(&self) -> JobCategory {
        self.category
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn handle(&self) -> Option<&JobHandle> {
        self.handle.as_ref()
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    pub fn display_log(&self) -> Vec<&str> {
        self.log.display_lines(self.category.progress_prefix())
    }

    /// True while a transport is open (or opening) for the current handle.
    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    pub fn update(&mut self, msg: JobMsg) -> Vec<JobEffect> {
        match msg {
            JobMsg::Start(handle) => {
                let mut effects = Vec::with_capacity(3);
                if let Some(previous) = self.monitor.take() {
                    effects.push(JobEffect::CloseTransport { monitor: previous });
                }
                let monitor = self.next_monitor;
                self.next_monitor += 1;
                effects.push(JobEffect::OpenTransport {
                    monitor,
                    url: handle.monitor_url.clone(),
                });
                effects.push(JobEffect::SetUrlParam {
                    key: self.category.query_key(),
                    value: handle.job_id.clone(),
                });
                self.monitor = Some(monitor);
                self.handle = Some(handle);
                self.phase = JobPhase::Connecting;
                self.log = JobLog::default();
                effects
            }
            JobMsg::TransportOpened { monitor } => {
                if self.is_current(monitor) && self.phase == JobPhase::Connecting {
                    self.phase = JobPhase::Active;
                }
                Vec::new()
            }
            JobMsg::Line { monitor, text } => {
                if !self.is_current(monitor) {
                    return Vec::new();
                }
                // A frame proves the connection even if the open event was missed.
                if self.phase == JobPhase::Connecting {
                    self.phase = JobPhase::Active;
                }
                let terminal = self.sentinels.classify(&text);
                self.log.push(text);
                match terminal {
                    Some(kind) => {
                        self.phase = JobPhase::Terminal(kind);
                        self.detach(monitor)
                    }
                    None => Vec::new(),
                }
            }
            JobMsg::TransportError { monitor, message } => {
                if self.is_current(monitor) {
                    self.log.push(format!("Transport error: {message}"));
                }
                Vec::new()
            }
            JobMsg::TransportClosed { monitor } => {
                if !self.is_current(monitor) {
                    return Vec::new();
                }
                self.log.push("Connection closed before the job reported completion");
                self.phase = JobPhase::Idle;
                self.monitor = None;
                vec![JobEffect::RemoveUrlParam {
                    key: self.category.query_key(),
                }]
            }
            JobMsg::CancelRequested => match (&self.handle, self.monitor) {
                (Some(handle), Some(_)) => vec![JobEffect::RequestCancel {
                    job_id: handle.job_id.clone(),
                    cancel_url: handle.cancel_url.clone(),
                }],
                _ => Vec::new(),
            },
            JobMsg::CancelAcknowledged { job_id, ok } => {
                let is_current_job = self
                    .handle
                    .as_ref()
                    .is_some_and(|handle| handle.job_id == job_id);
                if !is_current_job {
                    return Vec::new();
                }
                if !ok {
                    self.log.push(format!("Cancel of job {job_id} was not acknowledged"));
                    return Vec::new();
                }
                self.log.push(format!("Job {job_id} cancelled"));
                self.handle = None;
                self.phase = JobPhase::Idle;
                match self.monitor {
                    Some(monitor) => self.detach(monitor),
                    None => Vec::new(),
                }
            }
        }
    }

    fn is_current(&self, monitor: MonitorId) -> bool {
        self.monitor == Some(monitor)
    }

    fn detach(&mut self, monitor: MonitorId) -> Vec<JobEffect> {
        self.monitor = None;
        vec![
            JobEffect::CloseTransport { monitor },
            JobEffect::RemoveUrlParam {
                key: self.category.query_key(),
            },
        ]
    }
}
