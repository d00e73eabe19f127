//! File-backed report sink

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::diagnostics::{FailureArtifact, ReportSink};
use crate::error::E2eResult;

/// Attachment written next to the results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub test: String,
    pub name: String,
    pub mime_type: String,
    /// File name relative to the results directory
    pub source: String,
}

/// Results directory. Attachments land in `attachments/`, the summary in
/// `test-results.json`.
#[derive(Debug)]
pub struct ResultsDir {
    root: PathBuf,
    records: Mutex<Vec<AttachmentRecord>>,
}

impl ResultsDir {
    pub fn create(root: impl Into<PathBuf>) -> E2eResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("attachments"))?;
        Ok(Self {
            root,
            records: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every attachment record to `attachments.json`
    pub fn write_index(&self) -> E2eResult<PathBuf> {
        let path = self.root.join("attachments.json");
        let json = serde_json::to_string_pretty(&*self.records.lock())?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Attachments recorded for `test`
    pub fn attachments_for(&self, test: &str) -> Vec<AttachmentRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.test == test)
            .cloned()
            .collect()
    }
}

impl ReportSink for ResultsDir {
    fn attach(&self, test_name: &str, artifact: FailureArtifact) -> E2eResult<()> {
        let source = format!("attachments/{}-attachment.{}", Uuid::new_v4(), artifact.extension);
        std::fs::write(self.root.join(&source), &artifact.bytes)?;
        info!("Attached '{}' ({} bytes) to {}", artifact.name, artifact.bytes.len(), test_name);

        self.records.lock().push(AttachmentRecord {
            test: test_name.to_string(),
            name: artifact.name,
            mime_type: artifact.mime_type,
            source,
        });
        Ok(())
    }
}
