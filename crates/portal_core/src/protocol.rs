use std::fmt;

use crate::Sentinels;

/// Generation tag of a preview request. Strictly increasing per pane.
pub type RequestId = u64;

/// Identity of one job-monitor relay inside the worker.
pub type MonitorId = u64;

/// Messages posted to the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Stream a file with a plain GET.
    Preview {
        id: RequestId,
        url: String,
        max_bytes: Option<u64>,
        /// Overrides the response Content-Type for charset detection.
        content_type: Option<String>,
    },
    /// Stream the output of a server-side transformation (POST with mappings).
    ConvertPreview {
        id: RequestId,
        url: String,
        mappings: Vec<(String, String)>,
        max_bytes: Option<u64>,
    },
    /// Abort a running preview. Unknown or finished ids are ignored.
    Abort { id: RequestId },
    /// Relay text frames of a job transport.
    Monitor {
        id: MonitorId,
        url: String,
        sentinels: Sentinels,
    },
    /// Close a job relay.
    CloseMonitor { id: MonitorId },
}

/// One decoded piece of a preview stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviewChunk {
    pub text: String,
    pub is_first: bool,
    pub done: bool,
    pub truncated: bool,
    pub content_type: Option<String>,
    /// Bytes of the source consumed so far, including this chunk.
    pub cumulative_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewError {
    pub message: String,
    /// Line number for structured (e.g. XML parse) errors.
    pub line: Option<u32>,
}

impl PreviewError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for PreviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Error at line {line}: {}", self.message),
            None => write!(f, "Error: {}", self.message),
        }
    }
}

impl std::error::Error for PreviewError {}

/// Messages posted back by the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Chunk { id: RequestId, chunk: PreviewChunk },
    /// Terminal failure of a preview. Never sent for aborted transfers.
    Error { id: RequestId, error: PreviewError },
    /// The job transport connected.
    JobOpened { id: MonitorId },
    /// One text frame from a job transport; `done` when a sentinel matched.
    JobLine { id: MonitorId, msg: String, done: bool },
    /// Transport-level failure; the relay may still be alive.
    JobError { id: MonitorId, message: String },
    JobClosed { id: MonitorId },
}
