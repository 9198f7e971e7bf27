use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use portal_engine::Location;
use portal_logging::{portal_debug, portal_error, portal_warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize: {0}")]
    Serialize(#[from] ron::Error),
}

/// Write `content` to `path` through a temp file in the same directory and a
/// rename, creating the directory when missing.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}

pub fn to_ron<T: Serialize>(value: &T) -> Result<String, PersistError> {
    let pretty = ron::ser::PrettyConfig::new();
    Ok(ron::ser::to_string_pretty(value, pretty)?)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PageState {
    query: String,
}

/// Page location backed by the CLI state file, so a job id written while
/// monitoring is still there for the next invocation.
#[derive(Debug)]
pub struct FileLocation {
    path: PathBuf,
    query: Mutex<String>,
}

impl FileLocation {
    /// Open the state file. A missing or unreadable file starts with an
    /// empty query.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let query = load_query(&path);
        Self {
            path,
            query: Mutex::new(query),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, query: &str) -> Result<(), PersistError> {
        let content = to_ron(&PageState {
            query: query.to_string(),
        })?;
        write_atomic(&self.path, &content)
    }
}

impl Location for FileLocation {
    fn query(&self) -> String {
        self.query
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_query(&self, query: &str) {
        let mut current = self
            .query
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = query.to_string();
        match self.save(query) {
            Ok(()) => portal_debug!("Saved page state {:?} to {:?}", query, self.path),
            Err(err) => portal_error!("Failed to write page state to {:?}: {}", self.path, err),
        }
    }
}

fn load_query(path: &Path) -> String {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return String::new(),
        Err(err) => {
            portal_warn!("Failed to read page state from {:?}: {}", path, err);
            return String::new();
        }
    };
    match ron::from_str::<PageState>(&content) {
        Ok(state) => state.query,
        Err(err) => {
            portal_warn!("Failed to parse page state from {:?}: {}", path, err);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.ron");

        let location = FileLocation::open(&path);
        assert_eq!(location.query(), "");
        location.replace_query("?tab=ingest&ingest-job-id=42");

        let reopened = FileLocation::open(&path);
        assert_eq!(reopened.query(), "?tab=ingest&ingest-job-id=42");
    }

    #[test]
    fn unparsable_state_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.ron");
        fs::write(&path, "not ron at all (").unwrap();

        assert_eq!(FileLocation::open(&path).query(), "");
    }

    #[test]
    fn atomic_write_replaces_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.ron");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
