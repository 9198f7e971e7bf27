use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Fingerprint;

/// One schema or well-formedness problem reported by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlError {
    pub line: u32,
    pub pos: u32,
    #[serde(rename = "error")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub fingerprint: Fingerprint,
    pub errors: Vec<XmlError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validation outcomes keyed by content fingerprint, never by path.
#[derive(Debug, Clone, Default)]
pub struct ValidationCache {
    entries: HashMap<Fingerprint, Vec<XmlError>>,
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ValidationResult> {
        self.entries.get(fingerprint).map(|errors| ValidationResult {
            fingerprint: fingerprint.clone(),
            errors: errors.clone(),
        })
    }

    pub fn insert(&mut self, result: ValidationResult) {
        self.entries.insert(result.fingerprint, result.errors);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render the validation log shown under a file listing.
///
/// Files without a cached result are skipped.
pub fn validation_log<'a, I>(files: I, cache: &ValidationCache) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a Fingerprint)>,
{
    let mut log = Vec::new();
    for (key, fingerprint) in files {
        let Some(result) = cache.get(fingerprint) else {
            continue;
        };
        if result.is_valid() {
            log.push(format!("{key}: ✓"));
        } else {
            log.push(format!("{key}:"));
            for err in &result.errors {
                log.push(format!("    {}/{} - {}", err.line, err.pos, err.message));
            }
        }
    }
    log
}
