//! Execution engine: result types, failure taxonomy and the host-facing channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::RunReply;

pub mod channel;
pub mod guard;

pub use channel::{ChannelOptions, ExecutionChannel, HostStatus};
pub use guard::{ExecutionGuard, GuardPolicy, Step, StepLimit};

/// Error text produced by the instruction-count guard.
pub const LOOP_GUARD_MESSAGE: &str = "Code execution limit exceeded (possible infinite loop)";

/// Error text a host reports when a run outlives its own timeout.
pub const HOST_TIMEOUT_MESSAGE: &str = "Code execution timed out (possible infinite loop)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFailure {
    #[error("runtime not ready")]
    NotReady,
    #[error("execution timed out")]
    Timeout,
    #[error("{msg}", msg = LOOP_GUARD_MESSAGE)]
    LoopGuard,
    /// The host went away (recycled, restarted, shut down or exited) before replying.
    #[error("execution interrupted: interpreter host stopped")]
    Interrupted,
    #[error("{0}")]
    Runtime(String),
    /// The host could not start or died; it stays unavailable until restarted.
    #[error("Python is unavailable: {0}")]
    HostFatal(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { success: true, stdout: Some(stdout.into()), stderr: Some(String::new()), ..Default::default() }
    }

    pub fn failed(failure: ExecutionFailure) -> Self {
        Self { success: false, error: Some(failure.to_string()), ..Default::default() }
    }

    /// Classify a failed result. `None` when the run succeeded.
    pub fn failure(&self) -> Option<ExecutionFailure> {
        if self.success {
            return None;
        }
        let message = self.error.as_deref().unwrap_or_default();
        let known = [
            ExecutionFailure::NotReady,
            ExecutionFailure::Timeout,
            ExecutionFailure::Interrupted,
        ];
        if let Some(f) = known.into_iter().find(|f| f.to_string() == message) {
            return Some(f);
        }
        if message == HOST_TIMEOUT_MESSAGE {
            return Some(ExecutionFailure::Timeout);
        }
        if message.contains(LOOP_GUARD_MESSAGE) {
            return Some(ExecutionFailure::LoopGuard);
        }
        if let Some(reason) = message.strip_prefix("Python is unavailable: ") {
            return Some(ExecutionFailure::HostFatal(reason.to_string()));
        }
        Some(ExecutionFailure::Runtime(message.to_string()))
    }

    pub fn tripped_loop_guard(&self) -> bool {
        matches!(self.failure(), Some(ExecutionFailure::LoopGuard))
    }
}

impl From<RunReply> for ExecutionResult {
    fn from(reply: RunReply) -> Self {
        let error = match (reply.success, reply.error) {
            (false, None) => Some("execution failed".to_string()),
            (_, e) => e,
        };
        Self {
            success: reply.success,
            stdout: reply.stdout,
            stderr: reply.stderr,
            return_value: reply.result,
            error,
        }
    }
}
