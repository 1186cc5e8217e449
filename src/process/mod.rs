//! Interpreter hosts: launch, wiring and the host-side protocol.
//!
//! A host is anything that can hand back a [`HostEndpoint`]: a pair of line
//! channels carrying [`crate::protocol`] messages. The execution channel never
//! knows whether the other side is a child process or a thread.

use anyhow::Result;
use tokio::sync::mpsc;

pub mod local;
pub mod python;

pub use local::{Capture, Interpreter, InterpreterHost, ThreadHostLauncher};
pub use python::PythonLauncher;

/// Channel-side half of a host connection.
///
/// Dropping `outbound` asks the host to shut down; `inbound` ends when the
/// host goes away.
#[derive(Debug)]
pub struct HostEndpoint {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl HostEndpoint {
    /// Build a connected pair: the endpoint for the channel and the far ends for a host.
    pub fn pair() -> (Self, HostSide) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self { outbound: out_tx, inbound: in_rx },
            HostSide { requests: out_rx, replies: in_tx },
        )
    }
}

/// Host-side half of a connection.
#[derive(Debug)]
pub struct HostSide {
    pub requests: mpsc::UnboundedReceiver<String>,
    pub replies: mpsc::UnboundedSender<String>,
}

pub trait HostLauncher: Send + Sync {
    /// Start a fresh, isolated host. Called again whenever the channel recycles.
    fn launch(&self) -> Result<HostEndpoint>;
}
