//! Persisted transformation reports
//!
//! Reports are pretty-printed JSON files under `.reforge/reports/`, named
//! after their creation time, intent and a hash of the original code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{MetricsSnapshot, TransformationIntent, TransformationRequest, TransformationResult};

const REPORT_DIR: &str = ".reforge/reports";

/// Everything needed to audit one transformation after the fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationReport {
    pub intent: TransformationIntent,
    pub query: String,
    /// SHA256 of the original code
    pub source_hash: String,
    pub metrics_before: MetricsSnapshot,
    pub metrics_after: MetricsSnapshot,
    pub result: TransformationResult,
    /// RFC 3339 creation time
    pub saved_at: String,
}

impl TransformationReport {
    pub fn new(request: &TransformationRequest, result: &TransformationResult) -> Self {
        Self {
            intent: result.intent,
            query: request.query().to_string(),
            source_hash: hash_text(&result.original_code),
            metrics_before: result.metrics_before.clone(),
            metrics_after: result.metrics_after.clone(),
            result: result.clone(),
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Default directory for saved reports
    pub fn default_dir() -> PathBuf {
        PathBuf::from(REPORT_DIR)
    }

    /// Writes the report into `dir` and returns the file path
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

        let path = dir.join(self.file_name());
        let content = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read report {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse report {}", path.display()))
    }

    fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.result.created_at.format("%Y%m%dT%H%M%S%.3f"),
            self.intent,
            &self.source_hash[..8]
        )
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Report for \"{}\" ({}; source {})\n{}",
            self.query,
            self.saved_at,
            &self.source_hash[..8],
            self.result.summary()
        )
    }
}

/// Hex-encoded SHA256 of `text`
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
