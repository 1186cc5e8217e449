//! In-process interpreter host running on a dedicated thread.
//!
//! [`InterpreterHost`] is the host half of the protocol for any embedded
//! [`Interpreter`]; [`ThreadHostLauncher`] isolates one per OS thread and
//! connects it to the channel with line queues.

use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{HostEndpoint, HostLauncher, HostSide};
use crate::{
    execution::{ExecutionFailure, ExecutionGuard, GuardPolicy},
    protocol::{ChannelMessage, HostMessage, RunReply},
};

/// Output captured for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub stdout: String,
    pub stderr: String,
}

impl Capture {
    pub fn print(&mut self, text: &str) {
        self.stdout.push_str(text);
        self.stdout.push('\n');
    }

    pub fn eprint(&mut self, text: &str) {
        self.stderr.push_str(text);
        self.stderr.push('\n');
    }
}

/// An embedded interpreter.
///
/// `run` must call `guard.on_step()` for every unit of execution it evaluates
/// and stop with the abort message as soon as the guard says so. The guard
/// enforces both the step ceiling and the run's timeout.
pub trait Interpreter: Send + 'static {
    fn initialize(&mut self) -> Result<(), String>;

    /// Returns the value of the program (if any) or the error message.
    fn run(
        &mut self,
        code: &str,
        guard: &mut dyn ExecutionGuard,
        capture: &mut Capture,
    ) -> Result<Option<String>, String>;
}

pub struct InterpreterHost<I> {
    interpreter: I,
    policy: GuardPolicy,
    ready: bool,
}

impl<I: Interpreter> InterpreterHost<I> {
    pub fn new(interpreter: I, policy: GuardPolicy) -> Self {
        Self { interpreter, policy, ready: false }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Initialize the interpreter. Yields `ready` the first time it succeeds and
    /// nothing on later calls.
    pub fn start(&mut self) -> Option<HostMessage> {
        if self.ready {
            return None;
        }
        match self.interpreter.initialize() {
            Ok(()) => {
                self.ready = true;
                Some(HostMessage::Ready)
            }
            Err(e) => Some(HostMessage::Error { error: format!("Failed to initialize interpreter: {e}") }),
        }
    }

    /// Handle one raw request line. Malformed lines yield `None`.
    pub fn handle_line(&mut self, line: &str) -> Option<HostMessage> {
        ChannelMessage::parse(line).map(|msg| self.handle(msg))
    }

    pub fn handle(&mut self, msg: ChannelMessage) -> HostMessage {
        match msg {
            ChannelMessage::Run { id, code, timeout } => {
                HostMessage::Result(self.run(id, &code, Duration::from_millis(timeout)))
            }
        }
    }

    fn run(&mut self, id: String, code: &str, timeout: Duration) -> RunReply {
        if !self.ready {
            return RunReply {
                id,
                success: false,
                error: Some(ExecutionFailure::NotReady.to_string()),
                ..Default::default()
            };
        }

        // Fresh buffers, step counter and deadline for every run
        let mut capture = Capture::default();
        let mut guard = self.policy.start().with_timeout(timeout);
        let interpreter = &mut self.interpreter;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            interpreter.run(code, &mut guard, &mut capture)
        }))
        .unwrap_or_else(|_| Err("interpreter panicked".to_string()));

        match outcome {
            Ok(value) => RunReply {
                id,
                success: true,
                stdout: Some(capture.stdout),
                stderr: Some(capture.stderr),
                result: value,
                error: None,
            },
            Err(error) => RunReply {
                id,
                success: false,
                stdout: Some(capture.stdout),
                stderr: Some(capture.stderr),
                result: None,
                error: Some(error),
            },
        }
    }
}

/// Launches a fresh interpreter from `factory` on its own thread per host.
///
/// A thread cannot be killed: a run blocked inside the interpreter keeps its
/// thread busy after the channel abandons it, until the run returns.
pub struct ThreadHostLauncher<F> {
    factory: F,
    policy: GuardPolicy,
}

impl<F, I> ThreadHostLauncher<F>
where
    F: Fn() -> I + Send + Sync,
    I: Interpreter,
{
    pub fn new(factory: F, policy: GuardPolicy) -> Self {
        Self { factory, policy }
    }
}

impl<F, I> HostLauncher for ThreadHostLauncher<F>
where
    F: Fn() -> I + Send + Sync,
    I: Interpreter,
{
    fn launch(&self) -> Result<HostEndpoint> {
        let (endpoint, side) = HostEndpoint::pair();
        let host = InterpreterHost::new((self.factory)(), self.policy.clone());
        std::thread::Builder::new()
            .name("pyquest-host".into())
            .spawn(move || serve(host, side))
            .context("failed to spawn interpreter host thread")?;
        Ok(endpoint)
    }
}

fn serve<I: Interpreter>(mut host: InterpreterHost<I>, side: HostSide) {
    let HostSide { mut requests, replies } = side;
    if let Some(msg) = host.start() {
        if !send(&replies, &msg) {
            return;
        }
    }
    while let Some(line) = requests.blocking_recv() {
        match host.handle_line(&line) {
            Some(reply) => {
                if !send(&replies, &reply) {
                    break;
                }
            }
            None => debug!("host ignored malformed request"),
        }
    }
    debug!("interpreter host thread exiting");
}

fn send(replies: &tokio::sync::mpsc::UnboundedSender<String>, msg: &HostMessage) -> bool {
    match msg.to_line() {
        Ok(line) => replies.send(line).is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to encode host message");
            true
        }
    }
}
