use crate::paths::ResourceKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One file written to the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedResource {
    pub url: String,
    /// Path relative to the output root, `/`-separated.
    pub local_path: String,
    pub kind: ResourceKind,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub bytes_written: u64,
    pub response_time: Duration,
    /// Links rewritten in this page (always 0 for non-HTML).
    pub links_rewritten: usize,
    /// Links scheduled, or given a larger depth budget, when the page finished.
    pub links_followed: usize,
    /// Remaining depth the resource was fetched with.
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTarget {
    pub url: String,
    pub depth: u32,
    pub error: String,
}

/// Outcome of one mirror operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorReport {
    pub seed: String,
    pub output_root: PathBuf,
    pub saved: Vec<SavedResource>,
    pub failed: Vec<FailedTarget>,
    /// Targets dropped because their URL or local path had already been dispatched.
    pub duplicates_skipped: usize,
    pub elapsed: Duration,
}

impl MirrorReport {
    pub fn new(seed: String, output_root: PathBuf) -> Self {
        Self {
            seed,
            output_root,
            saved: Vec::new(),
            failed: Vec::new(),
            duplicates_skipped: 0,
            elapsed: Duration::from_secs(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.saved.len() + self.failed.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.saved.iter().map(|s| s.bytes_written).sum()
    }

    pub fn find(&self, url: &str) -> Option<&SavedResource> {
        self.saved.iter().find(|s| s.url == url)
    }
}
