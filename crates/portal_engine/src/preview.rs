use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use portal_core::{PreviewChunk, PreviewError};
use portal_logging::{portal_debug, portal_info};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::decode::{StreamDecoder, DEFAULT_CHARSET};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSettings {
    /// Byte budget per preview; `None` streams the whole body.
    pub max_bytes: Option<u64>,
    pub default_charset: String,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            max_bytes: Some(1024 * 1024),
            default_charset: DEFAULT_CHARSET.to_string(),
        }
    }
}

pub trait ChunkSink: Send + Sync {
    fn emit(&self, chunk: PreviewChunk);
}

/// Portion of one received buffer that fits the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub take: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteBudget {
    max: Option<u64>,
    read: u64,
}

impl ByteBudget {
    pub fn new(max: Option<u64>) -> Self {
        Self { max, read: 0 }
    }

    /// Account for a buffer of `len` bytes. A body of exactly `max` bytes
    /// is not truncated; only a byte past the budget is.
    pub fn admit(&mut self, len: usize) -> Admitted {
        let len64 = len as u64;
        match self.max {
            Some(max) if self.read + len64 > max => {
                let take = max.saturating_sub(self.read);
                self.read += take;
                Admitted {
                    take: take as usize,
                    truncated: true,
                }
            }
            _ => {
                self.read += len64;
                Admitted {
                    take: len,
                    truncated: false,
                }
            }
        }
    }

    pub fn read(&self) -> u64 {
        self.read
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Complete,
    Truncated,
    Aborted,
}

/// Decode `stream` into chunks on `sink` until it ends, the budget runs out,
/// or `cancel` fires.
///
/// Crossing the budget cancels `cancel` itself, so the caller's abort and
/// the truncation share one token and the transfer is stopped exactly once.
/// The last emitted chunk always has `done` set, except after an abort,
/// where nothing further is emitted.
pub async fn stream_body<S, E>(
    mut stream: S,
    mut decoder: StreamDecoder,
    max_bytes: Option<u64>,
    content_type: Option<String>,
    cancel: &CancellationToken,
    sink: &dyn ChunkSink,
) -> Result<StreamEnd, PreviewError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut budget = ByteBudget::new(max_bytes);
    let mut is_first = true;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Aborted),
            next = stream.next() => next,
        };
        match next {
            None => {
                sink.emit(PreviewChunk {
                    text: decoder.finish(),
                    is_first,
                    done: true,
                    truncated: false,
                    content_type: content_type.clone(),
                    cumulative_bytes: budget.read(),
                });
                return Ok(StreamEnd::Complete);
            }
            Some(Err(err)) => {
                if cancel.is_cancelled() {
                    return Ok(StreamEnd::Aborted);
                }
                return Err(PreviewError::new(err.to_string()));
            }
            Some(Ok(bytes)) => {
                let admitted = budget.admit(bytes.len());
                let text = decoder.decode(&bytes[..admitted.take]);
                if admitted.truncated {
                    cancel.cancel();
                    portal_info!("Aborting preview at {} bytes", budget.read());
                    sink.emit(PreviewChunk {
                        text,
                        is_first,
                        done: true,
                        truncated: true,
                        content_type: content_type.clone(),
                        cumulative_bytes: budget.read(),
                    });
                    return Ok(StreamEnd::Truncated);
                }
                sink.emit(PreviewChunk {
                    text,
                    is_first,
                    done: false,
                    truncated: false,
                    content_type: content_type.clone(),
                    cumulative_bytes: budget.read(),
                });
                is_first = false;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewMethod {
    Get,
    Post { body: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRequest {
    pub url: String,
    pub method: PreviewMethod,
    pub max_bytes: Option<u64>,
    /// Charset source overriding the response Content-Type.
    pub content_type: Option<String>,
}

impl PreviewRequest {
    pub fn get(url: impl Into<String>, max_bytes: Option<u64>) -> Self {
        Self {
            url: url.into(),
            method: PreviewMethod::Get,
            max_bytes,
            content_type: None,
        }
    }

    /// Transformation preview: the server applies `mappings` to the file.
    pub fn convert(
        url: impl Into<String>,
        mappings: &[(String, String)],
        max_bytes: Option<u64>,
    ) -> Self {
        let mappings: Vec<[&str; 2]> = mappings
            .iter()
            .map(|(source, target)| [source.as_str(), target.as_str()])
            .collect();
        Self {
            url: url.into(),
            method: PreviewMethod::Post {
                body: json!({ "mappings": mappings, "force": false }),
            },
            max_bytes,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[async_trait::async_trait]
pub trait PreviewLoader: Send + Sync {
    async fn load(
        &self,
        request: PreviewRequest,
        cancel: &CancellationToken,
        sink: &dyn ChunkSink,
    ) -> Result<StreamEnd, PreviewError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestPreviewLoader {
    settings: PreviewSettings,
}

impl ReqwestPreviewLoader {
    pub fn new(settings: PreviewSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PreviewSettings {
        &self.settings
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        url: reqwest::Url,
        method: &PreviewMethod,
    ) -> Result<reqwest::RequestBuilder, PreviewError> {
        Ok(match method {
            PreviewMethod::Get => client.get(url),
            PreviewMethod::Post { body } => {
                let body = serde_json::to_vec(body)
                    .map_err(|err| PreviewError::new(err.to_string()))?;
                client
                    .post(url)
                    .header("ajax-ignore-csrf", "true")
                    .header("X-Requested-With", "XMLHttpRequest")
                    .header(CONTENT_TYPE, "application/json")
                    .header(ACCEPT, "application/json; charset=utf-8")
                    .body(body)
            }
        })
    }
}

#[async_trait::async_trait]
impl PreviewLoader for ReqwestPreviewLoader {
    async fn load(
        &self,
        request: PreviewRequest,
        cancel: &CancellationToken,
        sink: &dyn ChunkSink,
    ) -> Result<StreamEnd, PreviewError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|err| PreviewError::new(format!("invalid preview URL: {err}")))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| PreviewError::new(err.to_string()))?;
        let builder = self.build_request(&client, url, &request.method)?;

        portal_debug!("Preview request to {}", request.url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Aborted),
            response = builder.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(_) if cancel.is_cancelled() => return Ok(StreamEnd::Aborted),
            Err(err) => return Err(PreviewError::new(err.to_string())),
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.bytes().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        // An override without a charset parameter must not mask the header's.
        let charset_source = request
            .content_type
            .as_deref()
            .filter(|value| value.to_ascii_lowercase().contains("charset="))
            .or(header_type.as_deref());
        let decoder = StreamDecoder::new(charset_source, &self.settings.default_charset)
            .map_err(|err| PreviewError::new(err.to_string()))?;
        portal_debug!("Reading preview with charset {}", decoder.encoding_name());

        stream_body(
            response.bytes_stream(),
            decoder,
            request.max_bytes,
            header_type,
            cancel,
            sink,
        )
        .await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    line: Option<u32>,
}

/// Non-200 responses: the server's `{error, line?}` JSON if it sent one.
fn status_error(status: reqwest::StatusCode, body: &[u8]) -> PreviewError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody {
            error,
            line: Some(line),
        }) => PreviewError::at_line(error, line),
        Ok(ErrorBody { error, line: None }) => PreviewError::new(error),
        Err(_) => PreviewError::new(status.to_string()),
    }
}
