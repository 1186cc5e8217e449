#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::Result;
use pyquest::{
    execution::{ChannelOptions, ExecutionChannel, ExecutionGuard, GuardPolicy, HostStatus, Step},
    process::{Capture, HostEndpoint, HostLauncher, HostSide, Interpreter, ThreadHostLauncher},
};

/// A toy line-oriented interpreter.
///
/// One statement per line:
/// `print TEXT`, `eprint TEXT`, `value TEXT`, `raise MSG`, `sleep MS`,
/// `loop` (runs until the guard stops it), `count` (prints how many runs this
/// instance has served) and `panic`.
#[derive(Debug, Default)]
pub struct ToyInterpreter {
    pub fail_init: Option<String>,
    runs: u32,
}

impl ToyInterpreter {
    pub fn failing(reason: &str) -> Self {
        Self { fail_init: Some(reason.to_string()), runs: 0 }
    }
}

impl Interpreter for ToyInterpreter {
    fn initialize(&mut self) -> Result<(), String> {
        match &self.fail_init {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    fn run(
        &mut self,
        code: &str,
        guard: &mut dyn ExecutionGuard,
        capture: &mut Capture,
    ) -> Result<Option<String>, String> {
        self.runs += 1;
        let mut value = None;
        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Step::Abort(msg) = guard.on_step() {
                return Err(msg);
            }
            let (op, arg) = line.split_once(' ').unwrap_or((line, ""));
            match op {
                "print" => capture.print(arg),
                "eprint" => capture.eprint(arg),
                "value" => value = Some(arg.to_string()),
                "raise" => return Err(arg.to_string()),
                "sleep" => thread::sleep(Duration::from_millis(arg.parse().unwrap_or(0))),
                "count" => capture.print(&self.runs.to_string()),
                "panic" => panic!("toy interpreter asked to panic"),
                "loop" => loop {
                    if let Step::Abort(msg) = guard.on_step() {
                        return Err(msg);
                    }
                },
                other => return Err(format!("NameError: {other}")),
            }
        }
        Ok(value)
    }
}

pub fn toy_launcher(policy: GuardPolicy) -> Arc<dyn HostLauncher> {
    Arc::new(ThreadHostLauncher::new(ToyInterpreter::default, policy))
}

pub fn fast_options() -> ChannelOptions {
    ChannelOptions {
        grace: Duration::from_millis(50),
        default_timeout: Duration::from_millis(1000),
        recycle_on_timeout: true,
    }
}

/// Channel over a toy host, already ready.
pub async fn ready_channel(policy: GuardPolicy, options: ChannelOptions) -> Result<ExecutionChannel> {
    let channel = ExecutionChannel::connect(toy_launcher(policy), options)?;
    let status = channel.wait_ready(Duration::from_secs(5)).await;
    anyhow::ensure!(status == HostStatus::Ready, "toy host not ready: {status:?}");
    Ok(channel)
}

/// Hands every launched host's far end to the test, which plays the host by hand.
#[derive(Clone, Default)]
pub struct ManualLauncher {
    sides: Arc<Mutex<Vec<HostSide>>>,
}

impl ManualLauncher {
    /// Take the host side of the most recent launch.
    pub fn take(&self) -> Option<HostSide> {
        self.sides.lock().ok()?.pop()
    }
}

impl HostLauncher for ManualLauncher {
    fn launch(&self) -> Result<HostEndpoint> {
        let (endpoint, side) = HostEndpoint::pair();
        self.sides
            .lock()
            .map_err(|_| anyhow::anyhow!("launcher poisoned"))?
            .push(side);
        Ok(endpoint)
    }
}
