//! Download progress shared between transfers and the status pollers.
//!
//! Two shapes are tracked:
//! - [`ProgressBoard`]: per-item `{loaded, total}` and error slots keyed by item id. An id
//!   present in the progress map is in flight; [`ProgressBoard::try_begin`] refuses a second
//!   transfer of the same id.
//! - [`TransferTracker`]: aggregate counters for sequential multi-file passes (server sync,
//!   required weights), guarded by a single `is_downloading` flag.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Bytes received so far for one transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub loaded: u64,
    pub total: u64,
}

/// Polled status of a single item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    pub progress: Option<Progress>,
    pub error: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BoardInner {
    progress: HashMap<String, Progress>,
    errors: HashMap<String, String>,
}

/// Per-item progress and error slots
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl ProgressBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for a transfer. Returns `None` if it is already in flight.
    ///
    /// Claiming clears any error left by a previous attempt. The claim is released
    /// when the returned handle is dropped.
    #[must_use]
    pub fn try_begin(&self, id: &str) -> Option<ProgressHandle> {
        let mut inner = lock(&self.inner);
        if inner.progress.contains_key(id) {
            return None;
        }
        inner.progress.insert(id.to_string(), Progress::default());
        inner.errors.remove(id);
        Some(ProgressHandle {
            board: self.clone(),
            id: id.to_string(),
        })
    }

    #[must_use]
    pub fn is_in_flight(&self, id: &str) -> bool {
        lock(&self.inner).progress.contains_key(id)
    }

    #[must_use]
    pub fn progress(&self, id: &str) -> Option<Progress> {
        lock(&self.inner).progress.get(id).copied()
    }

    #[must_use]
    pub fn error(&self, id: &str) -> Option<String> {
        lock(&self.inner).errors.get(id).cloned()
    }

    #[must_use]
    pub fn status(&self, id: &str) -> ItemStatus {
        let inner = lock(&self.inner);
        ItemStatus {
            progress: inner.progress.get(id).copied(),
            error: inner.errors.get(id).cloned(),
        }
    }

    /// Ids currently in flight
    #[must_use]
    pub fn in_flight(&self) -> Vec<String> {
        lock(&self.inner).progress.keys().cloned().collect()
    }
}

/// Exclusive claim on one item id
#[derive(Debug)]
pub struct ProgressHandle {
    board: ProgressBoard,
    id: String,
}

impl ProgressHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a chunk arrival
    pub fn update(&self, loaded: u64, total: u64) {
        lock(&self.board.inner)
            .progress
            .insert(self.id.clone(), Progress { loaded, total });
    }

    /// Restart counters for a fresh attempt
    pub fn reset(&self) {
        self.update(0, 0);
    }

    /// Record an error against this id; the claim stays until the handle drops
    pub fn record_error(&self, error: impl ToString) {
        lock(&self.board.inner)
            .errors
            .insert(self.id.clone(), error.to_string());
    }

    pub fn clear_error(&self) {
        lock(&self.board.inner).errors.remove(&self.id);
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        lock(&self.board.inner).progress.remove(&self.id);
    }
}

/// Polled status of a multi-file transfer pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub progress: Option<Progress>,
    pub error: Option<String>,
    pub is_downloading: bool,
    pub download_status: String,
    pub current_file_num: usize,
    pub file_count: usize,
    pub total_size_downloaded: u64,
    pub total_size: u64,
}

#[derive(Debug, Default)]
struct TransferState {
    progress: Option<Progress>,
    error: Option<String>,
    download_status: String,
    current_file_num: usize,
    file_count: usize,
    total_size_downloaded: u64,
    total_size: u64,
}

/// Aggregate counters for a sequential pass
///
/// Counters only grow during a pass and survive its end so the last poll sees the final
/// totals; they are zeroed by [`TransferTracker::begin_pass`].
#[derive(Debug, Default)]
pub struct TransferTracker {
    downloading: AtomicBool,
    state: Mutex<TransferState>,
}

impl TransferTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the tracker for a pass. Returns `None` if a pass is already running.
    #[must_use]
    pub fn try_begin(&self) -> Option<TransferGuard<'_>> {
        self.downloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        lock(&self.state).error = None;
        Some(TransferGuard { tracker: self })
    }

    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> TransferStatus {
        let state = lock(&self.state);
        TransferStatus {
            progress: state.progress,
            error: state.error.clone(),
            is_downloading: self.is_downloading(),
            download_status: state.download_status.clone(),
            current_file_num: state.current_file_num,
            file_count: state.file_count,
            total_size_downloaded: state.total_size_downloaded,
            total_size: state.total_size,
        }
    }

    /// Set the human-readable status line (also logged)
    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::info!("{status}");
        lock(&self.state).download_status = status;
    }

    /// Zero every counter and declare the size of the coming pass
    pub fn begin_pass(&self, file_count: usize, total_size: u64) {
        let mut state = lock(&self.state);
        state.file_count = file_count;
        state.total_size = total_size;
        state.total_size_downloaded = 0;
        state.current_file_num = 0;
        state.progress = None;
    }

    /// Move on to the next file and return its 1-based index
    pub fn next_file(&self) -> usize {
        let mut state = lock(&self.state);
        state.current_file_num += 1;
        state.progress = None;
        state.current_file_num
    }

    pub fn add_downloaded(&self, bytes: u64) {
        let mut state = lock(&self.state);
        state.total_size_downloaded = state.total_size_downloaded.saturating_add(bytes);
    }

    pub fn set_progress(&self, loaded: u64, total: u64) {
        lock(&self.state).progress = Some(Progress { loaded, total });
    }

    pub fn set_error(&self, error: impl ToString) {
        lock(&self.state).error = Some(error.to_string());
    }
}

/// Held for the duration of a pass
#[derive(Debug)]
pub struct TransferGuard<'a> {
    tracker: &'a TransferTracker,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.tracker.state);
            state.progress = None;
            state.download_status.clear();
        }
        self.tracker.downloading.store(false, Ordering::Release);
    }
}
