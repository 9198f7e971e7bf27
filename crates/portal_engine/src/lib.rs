//! Portal engine: streaming previews, job transports and uploads.
mod api;
mod controller;
mod decode;
mod monitor;
mod preview;
mod pretty;
mod transport;
mod upload;
mod worker;

pub use api::{
    ApiError, ApiRoutes, CancelResponse, ConvertConfig, FileList, HttpPortalApi, ImportConfig,
    OaiPmhConfig, PortalApi, ResourceSyncConfig, UploadHandle,
};
pub use controller::PreviewController;
pub use decode::{DecodeError, StreamDecoder, DEFAULT_CHARSET};
pub use monitor::{JobMonitorController, Location, MemoryLocation};
pub use preview::{
    stream_body, Admitted, ByteBudget, ChunkSink, PreviewLoader, PreviewMethod, PreviewRequest,
    PreviewSettings, ReqwestPreviewLoader, StreamEnd,
};
pub use pretty::{pretty_print_xml, PrettyPrintError};
pub use transport::{decode_frame, FrameSource, JobTransport, TransportError, WebSocketTransport};
pub use upload::{
    run_sequential, ProgressFn, ReqwestUploadTransport, UploadError, UploadItem, UploadOutcome,
    UploadPipeline, UploadTransport,
};
pub use worker::WorkerHandle;
