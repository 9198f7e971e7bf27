use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread;

use portal_core::{MonitorId, RequestId, Sentinels, WorkerEvent, WorkerRequest};
use portal_logging::{portal_debug, portal_info, portal_warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::preview::{ChunkSink, PreviewLoader, PreviewRequest, StreamEnd};
use crate::transport::JobTransport;

/// Background worker: a dedicated thread with its own tokio runtime,
/// driven by [`WorkerRequest`]s and answering with [`WorkerEvent`]s.
///
/// Events of one request travel a single FIFO channel, so they arrive in
/// the order they were produced.
pub struct WorkerHandle {
    cmd_tx: mpsc::Sender<WorkerRequest>,
    event_rx: UnboundedReceiver<WorkerEvent>,
}

impl WorkerHandle {
    pub fn spawn(loader: Arc<dyn PreviewLoader>, transport: Arc<dyn JobTransport>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = unbounded_channel();

        thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
            let mut tasks = Tasks::default();
            while let Ok(request) = cmd_rx.recv() {
                tasks.prune();
                let _guard = runtime.enter();
                tasks.dispatch(request, &loader, &transport, &event_tx);
            }
            portal_debug!("Worker shutting down");
        });

        Self { cmd_tx, event_rx }
    }

    pub fn post(&self, request: WorkerRequest) {
        let _ = self.cmd_tx.send(request);
    }

    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.event_rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WorkerEvent> {
        self.event_rx.try_recv().ok()
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Tasks {
    previews: HashMap<RequestId, Running>,
    monitors: HashMap<MonitorId, Running>,
}

impl Tasks {
    fn prune(&mut self) {
        self.previews.retain(|_, running| !running.task.is_finished());
        self.monitors.retain(|_, running| !running.task.is_finished());
    }

    fn dispatch(
        &mut self,
        request: WorkerRequest,
        loader: &Arc<dyn PreviewLoader>,
        transport: &Arc<dyn JobTransport>,
        events: &UnboundedSender<WorkerEvent>,
    ) {
        match request {
            WorkerRequest::Preview {
                id,
                url,
                max_bytes,
                content_type,
            } => {
                let mut request = PreviewRequest::get(url, max_bytes);
                request.content_type = content_type;
                self.start_preview(id, request, loader, events);
            }
            WorkerRequest::ConvertPreview {
                id,
                url,
                mappings,
                max_bytes,
            } => {
                let request = PreviewRequest::convert(url, &mappings, max_bytes);
                self.start_preview(id, request, loader, events);
            }
            WorkerRequest::Abort { id } => {
                if let Some(running) = self.previews.remove(&id) {
                    portal_debug!("Aborting preview {id}");
                    running.cancel.cancel();
                }
            }
            WorkerRequest::Monitor { id, url, sentinels } => {
                let cancel = CancellationToken::new();
                let task = tokio::spawn(relay_job(
                    transport.clone(),
                    id,
                    url,
                    sentinels,
                    cancel.clone(),
                    events.clone(),
                ));
                if let Some(previous) = self.monitors.insert(id, Running { cancel, task }) {
                    previous.cancel.cancel();
                }
            }
            WorkerRequest::CloseMonitor { id } => {
                if let Some(running) = self.monitors.remove(&id) {
                    running.cancel.cancel();
                }
            }
        }
    }

    fn start_preview(
        &mut self,
        id: RequestId,
        request: PreviewRequest,
        loader: &Arc<dyn PreviewLoader>,
        events: &UnboundedSender<WorkerEvent>,
    ) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_preview(
            loader.clone(),
            id,
            request,
            cancel.clone(),
            events.clone(),
        ));
        if let Some(previous) = self.previews.insert(id, Running { cancel, task }) {
            previous.cancel.cancel();
        }
    }
}

struct ChannelChunkSink {
    id: RequestId,
    tx: UnboundedSender<WorkerEvent>,
}

impl ChunkSink for ChannelChunkSink {
    fn emit(&self, chunk: portal_core::PreviewChunk) {
        let _ = self.tx.send(WorkerEvent::Chunk { id: self.id, chunk });
    }
}

async fn run_preview(
    loader: Arc<dyn PreviewLoader>,
    id: RequestId,
    request: PreviewRequest,
    cancel: CancellationToken,
    events: UnboundedSender<WorkerEvent>,
) {
    let sink = ChannelChunkSink {
        id,
        tx: events.clone(),
    };
    match loader.load(request, &cancel, &sink).await {
        Ok(StreamEnd::Complete) => portal_debug!("Preview {id} complete"),
        Ok(StreamEnd::Truncated) => portal_debug!("Preview {id} truncated"),
        Ok(StreamEnd::Aborted) => portal_debug!("Preview {id} aborted"),
        // An aborted transfer is not a failure.
        Err(_) if cancel.is_cancelled() => {}
        Err(error) => {
            portal_warn!("Preview {id} failed: {error}");
            let _ = events.send(WorkerEvent::Error { id, error });
        }
    }
}

async fn relay_job(
    transport: Arc<dyn JobTransport>,
    id: MonitorId,
    url: String,
    sentinels: Sentinels,
    cancel: CancellationToken,
    events: UnboundedSender<WorkerEvent>,
) {
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        connected = transport.connect(&url) => connected,
    };
    let mut frames = match connected {
        Ok(frames) => frames,
        Err(err) => {
            portal_warn!("Job transport {id}: {err}");
            let _ = events.send(WorkerEvent::JobError {
                id,
                message: err.to_string(),
            });
            let _ = events.send(WorkerEvent::JobClosed { id });
            return;
        }
    };
    let _ = events.send(WorkerEvent::JobOpened { id });

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                frames.close().await;
                return;
            }
            next = frames.next_frame() => next,
        };
        match next {
            Some(Ok(msg)) => {
                let done = sentinels.classify(&msg).is_some();
                let _ = events.send(WorkerEvent::JobLine { id, msg, done });
                if done {
                    portal_info!("Job transport {id} reached a terminal line");
                    frames.close().await;
                    return;
                }
            }
            Some(Err(err)) => {
                portal_warn!("Job transport {id}: {err}");
                let _ = events.send(WorkerEvent::JobError {
                    id,
                    message: err.to_string(),
                });
            }
            None => {
                let _ = events.send(WorkerEvent::JobClosed { id });
                return;
            }
        }
    }
}
