use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kv::KvStore;

/// Progress entries outlive a crashed run by at most this long.
const PROGRESS_TTL: Duration = Duration::from_secs(6 * 3600);

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Paginating,
    Reconciling,
    Sweeping,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Paginating => "paginating",
            Self::Reconciling => "reconciling",
            Self::Sweeping => "sweeping",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub phase: SyncPhase,
    pub current_page: u32,
    pub total_pages: u32,
    pub processed: u64,
    pub expected: u64,
}

/// Advisory progress state for status displays.
///
/// The orchestrator's own loop drives control flow; nothing here is read
/// back for correctness. Store failures are logged and swallowed.
pub struct ProgressTracker {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl ProgressTracker {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut ProgressSnapshot)) {
        let mut snapshot = self.snapshot();
        apply(&mut snapshot);
        let encoded = match serde_json::to_string(&snapshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode progress");
                return;
            }
        };
        if let Err(e) = self.kv.set(&self.key, &encoded, Some(PROGRESS_TTL)) {
            tracing::warn!(key = %self.key, error = %e, "could not record progress");
        }
    }

    pub fn set_totals(&self, total_pages: u32, total_items: u64) {
        self.update(|s| {
            s.total_pages = total_pages;
            s.expected = total_items;
        });
    }

    pub fn set_phase(&self, phase: SyncPhase) {
        self.update(|s| s.phase = phase);
    }

    pub fn set_current_page(&self, page: u32) {
        self.update(|s| s.current_page = page);
    }

    pub fn add_processed(&self, count: u64) {
        self.update(|s| s.processed = s.processed.saturating_add(count));
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        match self.kv.get(&self.key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => ProgressSnapshot::default(),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "could not read progress");
                ProgressSnapshot::default()
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.kv.delete(&self.key) {
            tracing::warn!(key = %self.key, error = %e, "could not clear progress");
        }
    }
}
