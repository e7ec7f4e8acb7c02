//! Snapshot producers.
//!
//! The probes themselves live outside this crate. [`CommandProducer`] runs
//! an external collector executable and takes its stdout as the snapshot.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{Span, debug};

use crate::error::{Error, Result};
use crate::model::Snapshot;

/// Stderr is echoed into errors up to this many bytes.
const MAX_STDERR: usize = 1024;

/// Yields one snapshot per call, or fails.
///
/// Producers never assign identity; that happens only when a snapshot is
/// spooled.
pub trait Producer: Send + Sync {
    fn produce(&self) -> impl Future<Output = Result<Snapshot>> + Send;
}

/// Identity stamped onto every snapshot before delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_version: String,
}

impl AgentInfo {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Merge `agent_id`/`agent_version` into the snapshot's `agent` object.
    ///
    /// Non-object snapshots are left untouched.
    pub fn stamp(&self, snapshot: &mut Snapshot) {
        let Some(root) = snapshot.as_value_mut().as_object_mut() else {
            return;
        };
        let agent = root
            .entry("agent")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        if !agent.is_object() {
            *agent = serde_json::Value::Object(Default::default());
        }
        if let Some(agent) = agent.as_object_mut() {
            agent.insert("agent_id".to_string(), self.agent_id.clone().into());
            agent.insert(
                "agent_version".to_string(),
                self.agent_version.clone().into(),
            );
        }
    }
}

/// Runs a collector executable and parses its stdout as JSON.
pub struct CommandProducer {
    program: PathBuf,
    args: Vec<OsString>,
    agent: Option<AgentInfo>,
    span: Span,
}

impl CommandProducer {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let program = program.into();
        let span = tracing::info_span!("producer", program = %program.display());
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            agent: None,
            span,
        }
    }

    /// Stamp produced snapshots with this agent identity.
    pub fn with_agent(mut self, agent: AgentInfo) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Replace the span this producer logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl Producer for CommandProducer {
    async fn produce(&self) -> Result<Snapshot> {
        let start = Instant::now();

        // Relative commands resolve against the agent's working directory.
        let program = if self.program.is_relative() && self.program.components().count() > 1 {
            std::env::current_dir()
                .map_err(|e| Error::Producer(format!("cannot resolve collector path: {e}")))?
                .join(&self.program)
        } else {
            self.program.clone()
        };

        debug!(parent: &self.span, command = %program.display(), "running collector");

        // The child is killed if the cycle times out and drops this future.
        let output = Command::new(&program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Producer(format!("failed to run {}: {e}", program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR).collect();
            return Err(Error::Producer(format!(
                "collector exited with status {}: {stderr}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Producer(format!("collector output is not JSON: {e}")))?;
        let mut snapshot = Snapshot::new(value);
        if let Some(ref agent) = self.agent {
            agent.stamp(&mut snapshot);
        }

        debug!(
            parent: &self.span,
            duration_ms = start.elapsed().as_millis() as u64,
            bytes = output.stdout.len(),
            "collector finished"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamp_merges_into_existing_agent_object() {
        let agent = AgentInfo {
            agent_id: "ws-agent-7".to_string(),
            agent_version: "1.2.3".to_string(),
        };
        let mut snapshot = Snapshot::new(json!({
            "event_type": "host_posture",
            "agent": {"hostname_hint": "ws-7"}
        }));

        agent.stamp(&mut snapshot);

        let value = snapshot.as_value();
        assert_eq!(value["agent"]["agent_id"], "ws-agent-7");
        assert_eq!(value["agent"]["agent_version"], "1.2.3");
        assert_eq!(value["agent"]["hostname_hint"], "ws-7");
        assert_eq!(value["event_type"], "host_posture");
    }

    #[test]
    fn stamp_replaces_non_object_agent_field() {
        let agent = AgentInfo::new("a1");
        let mut snapshot = Snapshot::new(json!({"agent": null}));
        agent.stamp(&mut snapshot);
        assert_eq!(snapshot.as_value()["agent"]["agent_id"], "a1");
    }

    #[test]
    fn stamp_ignores_non_object_snapshots() {
        let agent = AgentInfo::new("a1");
        let mut snapshot = Snapshot::new(json!([1, 2, 3]));
        agent.stamp(&mut snapshot);
        assert_eq!(snapshot.as_value(), &json!([1, 2, 3]));
    }
}
