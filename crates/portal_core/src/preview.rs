//! Per-pane preview state machine.
//!
//! `Idle → Loading → Streaming → {Truncated, Complete}`; a target change
//! restarts at `Loading` from any phase. Every load carries a fresh
//! [`RequestId`] and chunks tagged with any other id are dropped, so output of
//! a superseded request can never reach the displayed buffer.

use crate::{
    FileMeta, Fingerprint, PreviewChunk, PreviewError, RequestId, ValidationCache,
    ValidationResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewKind {
    /// Raw file contents.
    File,
    /// Output of the given source/target mappings applied to the file.
    Convert { mappings: Vec<(String, String)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewPhase {
    #[default]
    Idle,
    Loading,
    Streaming,
    Truncated,
    Complete,
    Failed,
}

impl PreviewPhase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, PreviewPhase::Loading | PreviewPhase::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewMsg {
    /// Select a file, or clear the pane with `None`.
    TargetSelected(Option<FileMeta>),
    /// New mappings for a convert pane; reloads the current target.
    MappingsChanged(Vec<(String, String)>),
    ChunkReceived { id: RequestId, chunk: PreviewChunk },
    LoadFailed { id: RequestId, error: PreviewError },
    ValidateRequested,
    ValidationCompleted(ValidationResult),
    ValidationFailed { fingerprint: Fingerprint, message: String },
    PrettyPrintToggled,
    PrettyPrinted {
        id: RequestId,
        result: Result<String, PreviewError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewEffect {
    StartLoad {
        id: RequestId,
        file: FileMeta,
        kind: PreviewKind,
        max_bytes: Option<u64>,
    },
    AbortLoad { id: RequestId },
    Validate { fingerprint: Fingerprint, path: String },
    PrettyPrint { id: RequestId, text: String },
}

/// Read-only projection handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewView<'a> {
    pub phase: PreviewPhase,
    pub target: Option<&'a FileMeta>,
    pub text: &'a str,
    pub content_type: Option<&'a str>,
    pub truncated: bool,
    pub pretty: bool,
    pub can_pretty_print: bool,
    pub validating: bool,
    pub validation: Option<&'a ValidationResult>,
    pub notice: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct PreviewPane {
    kind: PreviewKind,
    max_bytes: Option<u64>,
    validate_on_load: bool,
    target: Option<FileMeta>,
    current: Option<RequestId>,
    next_request: RequestId,
    phase: PreviewPhase,
    raw: String,
    content_type: Option<String>,
    cumulative_bytes: u64,
    pretty: Option<String>,
    show_pretty: bool,
    pretty_pending: bool,
    validation_requested: bool,
    validating: Option<Fingerprint>,
    validation: Option<ValidationResult>,
    cache: ValidationCache,
    notice: Option<String>,
}

impl PreviewPane {
    pub fn new(kind: PreviewKind, max_bytes: Option<u64>) -> Self {
        // Transformed output has no stable fingerprint on the server side.
        let validate_on_load = matches!(kind, PreviewKind::File);
        Self {
            kind,
            max_bytes,
            validate_on_load,
            target: None,
            current: None,
            next_request: 1,
            phase: PreviewPhase::Idle,
            raw: String::new(),
            content_type: None,
            cumulative_bytes: 0,
            pretty: None,
            show_pretty: false,
            pretty_pending: false,
            validation_requested: false,
            validating: None,
            validation: None,
            cache: ValidationCache::new(),
            notice: None,
        }
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_on_load = enabled;
        self
    }

    pub fn phase(&self) -> PreviewPhase {
        self.phase
    }

    pub fn target(&self) -> Option<&FileMeta> {
        self.target.as_ref()
    }

    /// Id of the request whose chunks are currently accepted.
    pub fn current_request(&self) -> Option<RequestId> {
        self.current
    }

    pub fn cumulative_bytes(&self) -> u64 {
        self.cumulative_bytes
    }

    pub fn cache(&self) -> &ValidationCache {
        &self.cache
    }

    /// Pretty printing needs the whole document: only complete loads qualify.
    pub fn can_pretty_print(&self) -> bool {
        self.phase == PreviewPhase::Complete
    }

    pub fn view(&self) -> PreviewView<'_> {
        let text = match (&self.pretty, self.show_pretty) {
            (Some(pretty), true) => pretty.as_str(),
            _ => self.raw.as_str(),
        };
        PreviewView {
            phase: self.phase,
            target: self.target.as_ref(),
            text,
            content_type: self.content_type.as_deref(),
            truncated: self.phase == PreviewPhase::Truncated,
            pretty: self.show_pretty && self.pretty.is_some(),
            can_pretty_print: self.can_pretty_print(),
            validating: self.validating.is_some(),
            validation: self.validation.as_ref(),
            notice: self.notice.as_deref(),
        }
    }

    /// Fingerprint of the current target: server eTag, else a digest of the
    /// complete content, else a digest of the listing metadata.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        let target = self.target.as_ref()?;
        if let Some(etag) = target.etag.as_deref() {
            return Some(Fingerprint::from_etag(etag));
        }
        if self.phase == PreviewPhase::Complete {
            return Some(Fingerprint::of_content(&self.raw));
        }
        Some(Fingerprint::of_metadata(target))
    }

    pub fn update(&mut self, msg: PreviewMsg) -> Vec<PreviewEffect> {
        match msg {
            PreviewMsg::TargetSelected(file) => self.select(file),
            PreviewMsg::MappingsChanged(mappings) => {
                if !matches!(self.kind, PreviewKind::Convert { .. }) {
                    return Vec::new();
                }
                self.kind = PreviewKind::Convert { mappings };
                match self.target.clone() {
                    Some(file) => self.start_load(file),
                    None => Vec::new(),
                }
            }
            PreviewMsg::ChunkReceived { id, chunk } => self.apply_chunk(id, chunk),
            PreviewMsg::LoadFailed { id, error } => {
                if self.current != Some(id) || !self.phase.is_in_flight() {
                    return Vec::new();
                }
                self.raw = error.to_string();
                self.content_type = None;
                self.phase = PreviewPhase::Failed;
                Vec::new()
            }
            PreviewMsg::ValidateRequested => self.request_validation(),
            PreviewMsg::ValidationCompleted(result) => {
                if self.validating.as_ref() == Some(&result.fingerprint) {
                    self.validating = None;
                    self.validation = Some(result.clone());
                }
                self.cache.insert(result);
                Vec::new()
            }
            PreviewMsg::ValidationFailed {
                fingerprint,
                message,
            } => {
                if self.validating.as_ref() == Some(&fingerprint) {
                    self.validating = None;
                    self.notice = Some(format!("Error attempting validation: {message}"));
                }
                Vec::new()
            }
            PreviewMsg::PrettyPrintToggled => self.toggle_pretty(),
            PreviewMsg::PrettyPrinted { id, result } => {
                if self.current != Some(id) || !self.pretty_pending {
                    return Vec::new();
                }
                self.pretty_pending = false;
                match result {
                    Ok(pretty) => {
                        self.pretty = Some(pretty);
                        self.show_pretty = true;
                    }
                    Err(error) => {
                        self.show_pretty = false;
                        self.notice = Some(format!("Unable to format: {error}"));
                    }
                }
                Vec::new()
            }
        }
    }

    fn select(&mut self, file: Option<FileMeta>) -> Vec<PreviewEffect> {
        let Some(file) = file else {
            let effects = self.abort_in_flight();
            self.target = None;
            self.current = None;
            self.phase = PreviewPhase::Idle;
            self.raw.clear();
            self.reset_request_state();
            return effects;
        };
        // Reselecting the same file only reloads after a failure.
        if self.target.as_ref() == Some(&file) && self.phase != PreviewPhase::Failed {
            return Vec::new();
        }
        self.start_load(file)
    }

    fn start_load(&mut self, file: FileMeta) -> Vec<PreviewEffect> {
        let mut effects = self.abort_in_flight();
        let id = self.next_request;
        self.next_request += 1;
        self.current = Some(id);
        self.target = Some(file.clone());
        self.phase = PreviewPhase::Loading;
        self.reset_request_state();
        effects.push(PreviewEffect::StartLoad {
            id,
            file,
            kind: self.kind.clone(),
            max_bytes: self.max_bytes,
        });
        effects
    }

    fn abort_in_flight(&self) -> Vec<PreviewEffect> {
        match self.current {
            Some(id) if self.phase.is_in_flight() => vec![PreviewEffect::AbortLoad { id }],
            _ => Vec::new(),
        }
    }

    fn reset_request_state(&mut self) {
        self.content_type = None;
        self.cumulative_bytes = 0;
        self.pretty = None;
        self.show_pretty = false;
        self.pretty_pending = false;
        self.validation_requested = false;
        self.validating = None;
        self.validation = None;
        self.notice = None;
    }

    fn apply_chunk(&mut self, id: RequestId, chunk: PreviewChunk) -> Vec<PreviewEffect> {
        if self.current != Some(id) || !self.phase.is_in_flight() {
            return Vec::new();
        }
        if chunk.is_first || self.phase == PreviewPhase::Loading {
            self.raw = chunk.text;
        } else {
            self.raw.push_str(&chunk.text);
        }
        if chunk.content_type.is_some() {
            self.content_type = chunk.content_type;
        }
        self.cumulative_bytes = self.cumulative_bytes.max(chunk.cumulative_bytes);

        if !chunk.done {
            self.phase = PreviewPhase::Streaming;
            return Vec::new();
        }
        self.phase = if chunk.truncated {
            PreviewPhase::Truncated
        } else {
            PreviewPhase::Complete
        };
        if self.validate_on_load && !self.validation_requested {
            return self.request_validation();
        }
        Vec::new()
    }

    fn request_validation(&mut self) -> Vec<PreviewEffect> {
        let (Some(fingerprint), Some(path)) = (
            self.fingerprint(),
            self.target.as_ref().map(|target| target.key.clone()),
        ) else {
            return Vec::new();
        };
        self.validation_requested = true;
        if let Some(hit) = self.cache.get(&fingerprint) {
            self.validating = None;
            self.validation = Some(hit);
            return Vec::new();
        }
        if self.validating.as_ref() == Some(&fingerprint) {
            return Vec::new();
        }
        self.validating = Some(fingerprint.clone());
        vec![PreviewEffect::Validate { fingerprint, path }]
    }

    fn toggle_pretty(&mut self) -> Vec<PreviewEffect> {
        if !self.can_pretty_print() || self.pretty_pending {
            return Vec::new();
        }
        if self.show_pretty {
            self.show_pretty = false;
            return Vec::new();
        }
        if self.pretty.is_some() {
            self.show_pretty = true;
            return Vec::new();
        }
        let Some(id) = self.current else {
            return Vec::new();
        };
        self.pretty_pending = true;
        vec![PreviewEffect::PrettyPrint {
            id,
            text: self.raw.clone(),
        }]
    }
}
