//! Batch recorder
//!
//! Persists a flushed batch to the record file and classifies it against the
//! reference transcript.
//!
//! # Record layout (one per flush, appended)
//!
//! ```text
//! <payload 1 raw bytes><payload 2 raw bytes>...
//! \nBinary:\n
//! <hex of payload 1>\n<hex of payload 2>\n...
//! \nSAME AS <keyword>\n | \nDIFF WITH <keyword>\n | \nNO <keyword>\n
//! \n\n
//! ```

use crate::domain::decoder::hex_dump;
use crate::domain::models::ComparisonResult;
use crate::domain::reference::ReferenceEngine;
use crate::domain::settings::SessionConfig;
use crate::infrastructure::storage::ExternalStorage;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

const BINARY_MARKER: &[u8] = b"\nBinary:\n";
const RECORD_SEPARATOR: &[u8] = b"\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub payloads: usize,
    /// `None` when nothing was compared (empty batch or storage unavailable)
    pub verdict: Option<ComparisonResult>,
    /// True only when the record was written and matched the reference
    pub same: bool,
}

pub struct Recorder {
    storage: Arc<dyn ExternalStorage>,
    reference: ReferenceEngine,
    record_file_name: String,
    write_lock: Mutex<()>,
}

impl Recorder {
    pub fn new(storage: Arc<dyn ExternalStorage>, config: &SessionConfig) -> Self {
        Self {
            storage,
            reference: ReferenceEngine::new(
                config.reference_keyword.clone(),
                config.reference_dirs.clone(),
            ),
            record_file_name: config.record_file_name.clone(),
            write_lock: Mutex::new(()),
        }
    }

    /// Persist and classify one batch. Never fails: faults are logged and
    /// reported as `same == false`.
    pub fn flush(&self, batch: &[Vec<u8>]) -> FlushReport {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut report = FlushReport {
            payloads: batch.len(),
            verdict: None,
            same: false,
        };
        if batch.is_empty() {
            return report;
        }
        if !self.storage.is_available() {
            error!("External storage unavailable, dropping batch of {}", batch.len());
            return report;
        }

        let dump = hex_dump(batch);
        let mut record: Vec<u8> = batch.concat();
        record.extend_from_slice(BINARY_MARKER);
        record.extend_from_slice(dump.as_bytes());

        let verdict = self.reference.compare(self.storage.as_ref(), &dump);
        record.extend_from_slice(verdict.marker(self.reference.keyword()).as_bytes());
        record.extend_from_slice(RECORD_SEPARATOR);
        report.verdict = Some(verdict);

        match self.storage.append(&self.record_file_name, &record) {
            Ok(()) => {
                info!(
                    "Recorded batch of {} payloads: {:?}",
                    batch.len(),
                    verdict
                );
                report.same = verdict == ComparisonResult::Same;
            }
            Err(e) => {
                warn!("Failed to write {}: {}", self.record_file_name, e);
            }
        }
        report
    }
}
