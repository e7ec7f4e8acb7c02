//! On-disk spool of undelivered snapshots.
//!
//! One JSON file per event, named `<id>.json`. Writes go to a hidden temp
//! file and are renamed into place, so a reader never sees a partial record.
//! Temp files orphaned by a crash are swept when the spool is opened.
//! Capacity is enforced on enqueue only: oldest records are evicted first.
//!
//! The directory is owned by a single agent process. There is no
//! inter-process locking.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{Span, debug, warn};

use crate::error::{Error, Result};
use crate::model::{Event, EventId, Snapshot};
use crate::telemetry::metrics;

/// Default maximum number of spooled events.
pub const DEFAULT_CAPACITY: usize = 100;

const RECORD_EXTENSION: &str = "json";

/// Bounded durable queue of pending events.
pub struct SpoolQueue {
    dir: PathBuf,
    max_capacity: usize,
    /// Last `created_at` handed out. Keeps timestamps strictly increasing
    /// even when the wall clock is coarse or steps backwards.
    last_stamp: Mutex<Option<DateTime<Utc>>>,
    span: Span,
}

impl SpoolQueue {
    /// Open (or create) a spool directory.
    pub async fn open(dir: impl AsRef<Path>, max_capacity: usize) -> Result<Self> {
        if max_capacity == 0 {
            return Err(Error::Config("spool capacity must be at least 1".to_string()));
        }

        let dir = dir.as_ref().to_path_buf();
        create_spool_dir(&dir).await?;

        let span = tracing::info_span!("spool", dir = %dir.display());
        let spool = Self {
            dir,
            max_capacity,
            last_stamp: Mutex::new(None),
            span,
        };

        spool.sweep_temp_files().await;

        // Resume the timestamp sequence after whatever survived the last run.
        let newest = spool.list_pending().await?.last().map(|e| e.created_at);
        *spool.stamp_guard() = newest;

        Ok(spool)
    }

    /// Replace the span this spool logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.max_capacity
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Persist a snapshot as a new event and enforce capacity.
    ///
    /// A write failure is returned as-is and not retried; the snapshot is
    /// lost for this cycle.
    pub async fn enqueue(&self, payload: &Snapshot) -> Result<EventId> {
        let event = Event {
            id: EventId::new(),
            created_at: self.next_stamp(),
            payload: payload.clone(),
        };

        let body = serde_json::to_vec_pretty(&event)?;
        let path = self.record_path(event.id);
        let tmp_path = self.dir.join(format!(".{}.{RECORD_EXTENSION}.tmp", event.id));

        if let Err(e) = write_atomic(&self.dir, &tmp_path, &path, &body).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            metrics::spool_enqueued().add(1, &[opentelemetry::KeyValue::new("result", "error")]);
            return Err(Error::Persistence(e));
        }

        metrics::spool_enqueued().add(1, &[opentelemetry::KeyValue::new("result", "ok")]);
        debug!(parent: &self.span, event_id = %event.id, bytes = body.len(), "event spooled");

        self.enforce_capacity().await;
        Ok(event.id)
    }

    /// All valid pending events, oldest first.
    ///
    /// Unreadable or unparsable records are logged and skipped.
    pub async fn list_pending(&self) -> Result<Vec<Event>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Persistence(e)),
        };

        let mut events = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = record_stem(&path) else {
                continue;
            };
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            match load_record(&path, stem).await {
                Ok(event) => events.push(event),
                Err(e) => warn!(parent: &self.span, error = %e, "skipping spool record"),
            }
        }

        events.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(events)
    }

    /// Delete a record. Removing an absent id is not an error.
    pub async fn remove(&self, id: EventId) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => {
                debug!(parent: &self.span, event_id = %id, "event removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(e)),
        }
    }

    /// Number of valid persisted records.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.list_pending().await?.len())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn record_path(&self, id: EventId) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn stamp_guard(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        // The guarded value is a plain timestamp; a poisoned lock still holds
        // a usable one.
        self.last_stamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_stamp(&self) -> DateTime<Utc> {
        let mut last = self.stamp_guard();
        let now = Utc::now();
        let stamp = match *last {
            Some(prev) if now <= prev => prev + ChronoDuration::nanoseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    /// Delete temp files left by a write that never reached its rename.
    async fn sweep_temp_files(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(parent: &self.span, error = %e, "cannot scan spool for temp files");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(parent: &self.span, error = %e, "temp file sweep interrupted");
                    break;
                }
            };
            let path = entry.path();
            if !is_temp_file(&path) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => warn!(parent: &self.span, path = %path.display(), "removed stale temp file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    parent: &self.span,
                    path = %path.display(),
                    error = %e,
                    "cannot remove stale temp file"
                ),
            }
        }
    }

    /// Evict oldest records until at most `max_capacity` remain.
    async fn enforce_capacity(&self) {
        let pending = match self.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(parent: &self.span, error = %e, "capacity check failed");
                return;
            }
        };

        let excess = pending.len().saturating_sub(self.max_capacity);
        for event in pending.into_iter().take(excess) {
            match self.remove(event.id).await {
                Ok(()) => {
                    metrics::spool_evicted().add(1, &[]);
                    warn!(
                        parent: &self.span,
                        event_id = %event.id,
                        created_at = %event.created_at,
                        capacity = self.max_capacity,
                        "spool full, evicted oldest event"
                    );
                }
                Err(e) => {
                    warn!(parent: &self.span, event_id = %event.id, error = %e, "eviction failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Create the spool directory if missing. Only a newly created directory
/// is restricted to its owner; an existing one keeps its permissions.
async fn create_spool_dir(dir: &Path) -> Result<()> {
    match tokio::fs::metadata(dir).await {
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Persistence(e)),
    }

    tokio::fs::create_dir_all(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }

    Ok(())
}

/// Write `body` to `tmp_path`, fsync, then rename over `path`.
async fn write_atomic(
    dir: &Path,
    tmp_path: &Path,
    path: &Path,
    body: &[u8],
) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)
        .await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp_path, path).await?;

    // Persist the rename itself. Not every platform can open a directory.
    if let Ok(dir_handle) = tokio::fs::File::open(dir).await {
        let _ = dir_handle.sync_all().await;
    }

    Ok(())
}

/// `.<id>.json.tmp`, as written by [`SpoolQueue::enqueue`].
fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(&format!(".{RECORD_EXTENSION}.tmp")))
}

/// File stem of a published record, or `None` for temp files and strangers.
fn record_stem(path: &Path) -> Option<&str> {
    if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem)
}

async fn load_record(path: &Path, stem: &str) -> Result<Event> {
    let corrupt = |reason: String| Error::CorruptRecord {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| corrupt(format!("read failed: {e}")))?;
    let event: Event =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("invalid record: {e}")))?;

    if event.id.to_string() != stem {
        return Err(corrupt(format!("record id {} does not match file name", event.id)));
    }

    Ok(event)
}
