//! Portal core: pure state machines for previews, job monitoring and uploads.
mod file;
mod job;
mod preview;
mod protocol;
mod query;
mod upload;
mod validation;

pub use file::{FileMeta, Fingerprint};
pub use job::{
    JobCategory, JobEffect, JobHandle, JobLog, JobMonitor, JobMsg, JobPhase, MonitorUrlTemplate,
    Sentinels, TerminalKind,
};
pub use preview::{PreviewEffect, PreviewKind, PreviewMsg, PreviewPane, PreviewPhase, PreviewView};
pub use protocol::{
    MonitorId, PreviewChunk, PreviewError, RequestId, WorkerEvent, WorkerRequest,
};
pub use query::QueryState;
pub use upload::{
    accept_files, human_file_size, progress_percent, FileToUpload, NoValidFiles, UploadEntry,
    UploadQueue, UploadSummary, ACCEPTED_UPLOAD_TYPE,
};
pub use validation::{validation_log, ValidationCache, ValidationResult, XmlError};
