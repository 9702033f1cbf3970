//! Reference Comparison Engine
//!
//! The reference transcript is located once, by keyword match on file name,
//! in an ordered list of directories on external storage. Whatever the
//! search yields (including nothing) is memoized for the lifetime of the
//! engine.

use crate::domain::models::ComparisonResult;
use crate::infrastructure::storage::ExternalStorage;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default keyword the reference file name must contain
pub const DEFAULT_REFERENCE_KEYWORD: &str = "cardiochek_ble";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDocument {
    /// Path of the file relative to the storage root
    pub source: String,
    pub raw: String,
    pub normalized: String,
}

impl ReferenceDocument {
    pub fn new(source: String, raw: String) -> Self {
        let normalized = normalize(&raw);
        Self {
            source,
            raw,
            normalized,
        }
    }
}

/// Strip tabs, newlines and carriage returns
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

pub struct ReferenceEngine {
    keyword: String,
    search_dirs: Vec<String>,
    document: OnceLock<Option<ReferenceDocument>>,
}

impl ReferenceEngine {
    pub fn new(keyword: impl Into<String>, search_dirs: Vec<String>) -> Self {
        Self {
            keyword: keyword.into(),
            search_dirs,
            document: OnceLock::new(),
        }
    }

    /// Name used in verdict markers
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Memoized reference, searching storage on first call only
    pub fn document(&self, storage: &dyn ExternalStorage) -> Option<&ReferenceDocument> {
        self.document.get_or_init(|| self.load(storage)).as_ref()
    }

    pub fn compare(&self, storage: &dyn ExternalStorage, hex_dump: &str) -> ComparisonResult {
        match self.document(storage) {
            Some(reference) => compare_with(reference, hex_dump),
            None => ComparisonResult::NoReference,
        }
    }

    fn load(&self, storage: &dyn ExternalStorage) -> Option<ReferenceDocument> {
        if self.keyword.is_empty() {
            warn!("Reference keyword is empty, comparisons disabled");
            return None;
        }
        if !storage.is_available() {
            warn!("External storage unavailable, no {} file", self.keyword);
            return None;
        }

        for dir in &self.search_dirs {
            let names = match storage.list_files(dir) {
                Ok(names) => names,
                Err(_) => continue,
            };
            let Some(name) = names.into_iter().find(|n| n.contains(&self.keyword)) else {
                continue;
            };

            let source = if dir.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", dir, name)
            };
            return match storage.read_to_string(dir, &name) {
                Ok(raw) => {
                    info!("Loaded reference transcript {}", source);
                    Some(ReferenceDocument::new(source, raw))
                }
                Err(e) => {
                    warn!("Failed to read reference {}: {}", source, e);
                    None
                }
            };
        }

        warn!("No {} file", self.keyword);
        None
    }
}

/// Whole-document, case-insensitive comparison after normalization
pub fn compare_with(reference: &ReferenceDocument, hex_dump: &str) -> ComparisonResult {
    if reference.normalized.is_empty() {
        return ComparisonResult::NoReference;
    }
    if reference.normalized.eq_ignore_ascii_case(&normalize(hex_dump)) {
        ComparisonResult::Same
    } else {
        ComparisonResult::Different
    }
}
