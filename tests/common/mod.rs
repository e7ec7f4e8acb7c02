//! Shared fakes for pipeline tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use posture_agent::error::{Error, Result};
use posture_agent::model::Snapshot;
use posture_agent::producer::Producer;
use posture_agent::spool::SpoolQueue;
use posture_agent::transport::Transport;
use serde_json::json;
use tempfile::TempDir;

pub fn snapshot(seq: usize) -> Snapshot {
    Snapshot::new(json!({
        "event_type": "host_posture",
        "seq": seq,
        "host": {"hostname": "ws-01", "os": "Windows 11 Pro"},
        "inventory": {"processes": [{"name": "svchost.exe", "pid": 800 + seq}]},
    }))
}

pub async fn temp_spool(capacity: usize) -> (TempDir, SpoolQueue) {
    let dir = tempfile::tempdir().expect("tempdir");
    let spool = SpoolQueue::open(dir.path().join("spool"), capacity)
        .await
        .expect("open spool");
    (dir, spool)
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Produces numbered snapshots, or always fails.
pub struct FakeProducer {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeProducer {
    pub fn ok() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Producer for FakeProducer {
    async fn produce(&self) -> Result<Snapshot> {
        let seq = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(Error::Producer("probe failed: access denied".to_string()))
        } else {
            Ok(snapshot(seq))
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Replays a script of outcomes (`true` = delivered), then falls back to a
/// default. Records every payload it was asked to send.
pub struct FakeTransport {
    script: Mutex<VecDeque<bool>>,
    default_ok: bool,
    delay: Option<Duration>,
    sent: Mutex<Vec<Snapshot>>,
}

impl FakeTransport {
    pub fn always_ok() -> Self {
        Self::scripted([], true)
    }

    pub fn always_failing() -> Self {
        Self::scripted([], false)
    }

    pub fn scripted(script: impl IntoIterator<Item = bool>, default_ok: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            default_ok,
            delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every send waits this long before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Snapshot> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    async fn send(&self, payload: &Snapshot) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.sent.lock().unwrap().push(payload.clone());
        let ok = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_ok);

        if ok {
            Ok(())
        } else {
            Err(Error::Transport("HTTP 503 Service Unavailable: ".to_string()))
        }
    }
}
