//! CPython interpreter process bootstrap and I/O glue.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::mpsc,
};
use tracing::{debug, warn};

use super::{HostEndpoint, HostLauncher};
use crate::{
    config::Config,
    execution::{GuardPolicy, HOST_TIMEOUT_MESSAGE},
};

/// Host side of the protocol, executed by `python -u -c`.
///
/// `__STEP_LIMIT__`, `__GUARD_MESSAGE__` and `__TIMEOUT_MESSAGE__` are
/// substituted before launch. Each run's `timeout` arms `ITIMER_REAL`, so a
/// blocking call is interrupted inside the host and the host stays up.
const BOOTSTRAP: &str = r#"
import sys

_proto_out = sys.stdout
_proto_in = sys.stdin


def _send(msg):
    _proto_out.write(json.dumps(msg) + "\n")
    _proto_out.flush()


try:
    import ast
    import io
    import json
    import signal

    _LIMIT = __STEP_LIMIT__
    _MESSAGE = __GUARD_MESSAGE__
    _TIMEOUT_MESSAGE = __TIMEOUT_MESSAGE__
    _HAS_TIMER = hasattr(signal, "setitimer")

    class ExecutionLimitExceeded(BaseException):
        pass

    class ExecutionTimedOut(BaseException):
        pass

    def _on_alarm(signum, frame):
        raise ExecutionTimedOut(_TIMEOUT_MESSAGE)
except BaseException as e:
    sys.__stdout__.write('{"type": "error", "error": "Failed to initialize Python: %s"}\n' % type(e).__name__)
    sys.__stdout__.flush()
    raise SystemExit(1)


def _describe(e):
    if isinstance(e, ExecutionLimitExceeded):
        return _MESSAGE
    if isinstance(e, ExecutionTimedOut):
        return _TIMEOUT_MESSAGE
    if isinstance(e, SyntaxError):
        return "SyntaxError: %s (line %s)" % (e.msg, e.lineno)
    text = str(e)
    return "%s: %s" % (type(e).__name__, text) if text else type(e).__name__


def _arm(seconds):
    if not _HAS_TIMER:
        return
    if seconds:
        signal.signal(signal.SIGALRM, _on_alarm)
    signal.setitimer(signal.ITIMER_REAL, seconds)


def _run(code, seconds):
    steps = [0]

    def trace(frame, event, arg):
        steps[0] += 1
        if steps[0] > _LIMIT:
            raise ExecutionLimitExceeded(_MESSAGE)
        return trace

    out, err = io.StringIO(), io.StringIO()
    scope = {"__name__": "__main__", "__builtins__": __builtins__}
    sys.stdout, sys.stderr, sys.stdin = out, err, io.StringIO()
    try:
        tree = ast.parse(code, "<learner>", "exec")
        tail = None
        if tree.body and isinstance(tree.body[-1], ast.Expr):
            tail = ast.Expression(tree.body.pop().value)
        body = compile(tree, "<learner>", "exec")
        value = None
        sys.settrace(trace)
        _arm(seconds)
        try:
            exec(body, scope)
            if tail is not None:
                value = eval(compile(tail, "<learner>", "eval"), scope)
        finally:
            _arm(0)
            sys.settrace(None)
        reply = {"success": True}
        if value is not None:
            reply["result"] = str(value)
    except BaseException as e:
        reply = {"success": False, "error": _describe(e)}
    finally:
        sys.stdout, sys.stderr, sys.stdin = sys.__stdout__, sys.__stderr__, _proto_in
    reply["stdout"] = out.getvalue()
    reply["stderr"] = err.getvalue()
    return reply


_send({"type": "ready"})
while True:
    line = _proto_in.readline()
    if not line:
        break
    try:
        msg = json.loads(line)
    except ValueError:
        continue
    if not isinstance(msg, dict) or msg.get("type") != "run" or not isinstance(msg.get("id"), str):
        continue
    timeout = msg.get("timeout")
    seconds = timeout / 1000.0 if isinstance(timeout, (int, float)) and timeout > 0 else 0
    reply = _run(str(msg.get("code", "")), seconds)
    reply["type"] = "result"
    reply["id"] = msg["id"]
    _send(reply)
"#;

/// Render the bootstrap with the given guard policy baked in.
pub fn bootstrap(policy: &GuardPolicy) -> Result<String> {
    let message = serde_json::to_string(&policy.message)?;
    let timeout_message = serde_json::to_string(HOST_TIMEOUT_MESSAGE)?;
    Ok(BOOTSTRAP
        .replace("__STEP_LIMIT__", &policy.ceiling.to_string())
        .replace("__GUARD_MESSAGE__", &message)
        .replace("__TIMEOUT_MESSAGE__", &timeout_message))
}

#[derive(Debug, Clone)]
pub struct PythonLauncher {
    pub program: String,
    pub policy: GuardPolicy,
}

impl PythonLauncher {
    pub fn new(program: impl Into<String>, policy: GuardPolicy) -> Self {
        Self { program: program.into(), policy }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.python_bin(), GuardPolicy::from_config(cfg))
    }
}

impl HostLauncher for PythonLauncher {
    /// Must be called from within a tokio runtime.
    fn launch(&self) -> Result<HostEndpoint> {
        let script = bootstrap(&self.policy)?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("-u") // unbuffered
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child: Child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn python interpreter: {}", self.program))?;
        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("no stderr"))?;
        debug!(pid = ?child.id(), program = %self.program, "python host started");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                let framed = format!("{}\n", line.trim_end());
                if let Err(e) = stdin.write_all(framed.as_bytes()).await {
                    warn!(error = %e, "failed to write to python host");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // The supervisor owns the child. Once the channel drops its inbound
        // receiver the process is killed, even while a write is stuck on a
        // full stdin pipe.
        let dropped = in_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = dropped.closed() => {
                    if let Err(e) = child.kill().await {
                        debug!(error = %e, "python host already gone");
                    }
                }
                status = child.wait() => {
                    debug!(status = ?status, "python host exited");
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if in_tx.send(line).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "pyquest::python", "{line}");
            }
        });

        Ok(HostEndpoint { outbound: out_tx, inbound: in_rx })
    }
}
