//! Instruction-count guard.
//!
//! An interpreter embedding calls [`ExecutionGuard::on_step`] once per evaluated
//! unit of execution (a line, a call, a bytecode, whatever it can observe).
//! The guard's policy is independent of the interpreter technology: the same
//! [`GuardPolicy`] configures the in-process [`StepLimit`] and the trace hook
//! installed by the CPython bootstrap.
//!
//! A run may also carry a deadline. The guard checks it on every step, so a
//! run that stops stepping (a blocking call) is only caught at its next step.

use std::time::{Duration, Instant};

use crate::config::Config;

use super::{HOST_TIMEOUT_MESSAGE, LOOP_GUARD_MESSAGE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Abort(String),
}

pub trait ExecutionGuard {
    fn on_step(&mut self) -> Step;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    pub ceiling: u64,
    pub message: String,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self { ceiling: 1_000_000, message: LOOP_GUARD_MESSAGE.to_string() }
    }
}

impl GuardPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        let mut policy = Self::default();
        if let Some(ceiling) = cfg.get_u64("PYQUEST_STEP_LIMIT").filter(|c| *c > 0) {
            policy.ceiling = ceiling;
        }
        policy
    }

    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// A fresh counter for one run.
    pub fn start(&self) -> StepLimit {
        StepLimit { steps: 0, policy: self.clone(), deadline: None }
    }
}

/// Counts steps and aborts once the ceiling is exceeded.
///
/// After tripping, every further step aborts as well so that code which
/// swallows the first abort still cannot keep running.
#[derive(Debug, Clone)]
pub struct StepLimit {
    steps: u64,
    policy: GuardPolicy,
    deadline: Option<Instant>,
}

impl StepLimit {
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Also abort once `timeout` has elapsed from now. A zero timeout sets no deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.deadline = Instant::now().checked_add(timeout);
        }
        self
    }
}

impl ExecutionGuard for StepLimit {
    fn on_step(&mut self) -> Step {
        self.steps = self.steps.saturating_add(1);
        if self.steps > self.policy.ceiling {
            return Step::Abort(self.policy.message.clone());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Step::Abort(HOST_TIMEOUT_MESSAGE.to_string()),
            _ => Step::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborts_only_after_ceiling() {
        let mut guard = GuardPolicy::default().with_ceiling(3).start();
        for _ in 0..3 {
            assert_eq!(guard.on_step(), Step::Continue);
        }
        assert_eq!(guard.on_step(), Step::Abort(LOOP_GUARD_MESSAGE.to_string()));
        assert_eq!(guard.on_step(), Step::Abort(LOOP_GUARD_MESSAGE.to_string()));
        assert_eq!(guard.steps(), 5);
    }

    #[test]
    fn each_run_starts_from_zero() {
        let policy = GuardPolicy::default().with_ceiling(1);
        let mut first = policy.start();
        first.on_step();
        assert!(matches!(first.on_step(), Step::Abort(_)));
        let mut second = policy.start();
        assert_eq!(second.on_step(), Step::Continue);
    }

    #[test]
    fn deadline_aborts_at_the_next_step() {
        let mut guard = GuardPolicy::default().start().with_timeout(Duration::from_millis(20));
        assert_eq!(guard.on_step(), Step::Continue);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(guard.on_step(), Step::Abort(HOST_TIMEOUT_MESSAGE.to_string()));

        let mut unbounded = GuardPolicy::default().start().with_timeout(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(unbounded.on_step(), Step::Continue);
    }
}
