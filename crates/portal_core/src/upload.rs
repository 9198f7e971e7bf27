use std::fmt;

use serde::{Deserialize, Serialize};

/// The only content type the upload stage accepts.
pub const ACCEPTED_UPLOAD_TYPE: &str = "text/xml";

/// Description of a file sent to the upload-handle endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileToUpload {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
}

impl FileToUpload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size,
        }
    }
}

/// A visible row of the upload progress list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub file: FileToUpload,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub finished: bool,
}

/// Upload progress list. Presence in the queue is what "still queued" means:
/// removing an entry cancels its upload, before or during the transfer.
#[derive(Debug, Clone, Default)]
pub struct UploadQueue {
    entries: Vec<UploadEntry>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row for `file`. Refused while a row of the same name is still
    /// uploading; a finished row waiting to be pruned is replaced.
    pub fn enqueue(&mut self, file: FileToUpload) -> bool {
        let entry = UploadEntry {
            file,
            progress: 0,
            finished: false,
        };
        match self.position(&entry.file.name) {
            Some(index) if self.entries[index].finished => {
                self.entries[index] = entry;
                true
            }
            Some(_) => false,
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Queued and not yet finished.
    pub fn is_active(&self, name: &str) -> bool {
        self.position(name)
            .is_some_and(|index| !self.entries[index].finished)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Record progress; returns `false` when the entry is gone, which tells
    /// the transport to abort the transfer.
    pub fn set_progress(&mut self, name: &str, percent: u8) -> bool {
        match self.position(name) {
            Some(index) => {
                self.entries[index].progress = percent.min(100);
                true
            }
            None => false,
        }
    }

    /// Force 100% and mark the row for removal by [`UploadQueue::prune_finished`].
    pub fn finish(&mut self, name: &str) {
        if let Some(index) = self.position(name) {
            let entry = &mut self.entries[index];
            entry.progress = 100;
            entry.finished = true;
        }
    }

    pub fn prune_finished(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.finished);
        before - self.entries.len()
    }

    /// Cancel every remaining upload.
    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[UploadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.file.name == name)
    }
}

/// Transfer progress as a percentage; `None` when the total is unknown.
pub fn progress_percent(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = ((loaded as f64 / total as f64) * 100.0).round();
    Some(percent.clamp(0.0, 100.0) as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoValidFiles;

impl fmt::Display for NoValidFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No valid files found")
    }
}

impl std::error::Error for NoValidFiles {}

/// Keep only XML files. A non-empty selection without any XML is an error;
/// an empty selection is not.
pub fn accept_files(files: Vec<FileToUpload>) -> Result<Vec<FileToUpload>, NoValidFiles> {
    let offered = files.len();
    let accepted: Vec<FileToUpload> = files
        .into_iter()
        .filter(|file| {
            let essence = file.content_type.split(';').next().unwrap_or("").trim();
            essence.eq_ignore_ascii_case(ACCEPTED_UPLOAD_TYPE)
        })
        .collect();
    if accepted.is_empty() && offered > 0 {
        return Err(NoValidFiles);
    }
    Ok(accepted)
}

/// Outcome counts of one upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadSummary {
    pub done: usize,
    pub cancelled: usize,
}

impl fmt::Display for UploadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uploaded: {}", self.done)?;
        if self.cancelled > 0 {
            write!(f, ", Cancelled: {}", self.cancelled)?;
        }
        Ok(())
    }
}

pub fn human_file_size(bytes: u64, si: bool) -> String {
    let thresh = if si { 1000.0 } else { 1024.0 };
    if (bytes as f64) < thresh {
        return format!("{bytes} B");
    }
    let units: [&str; 8] = if si {
        ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"]
    } else {
        ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"]
    };
    let mut value = bytes as f64;
    let mut unit = 0;
    value /= thresh;
    while value >= thresh && unit < units.len() - 1 {
        value /= thresh;
        unit += 1;
    }
    format!("{value:.1} {}", units[unit])
}
