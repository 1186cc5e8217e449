//! Code-execution bridge, grader and progression engine for an interactive
//! Python course.
//!
//! Learner code travels through an [`execution::ExecutionChannel`] to an
//! isolated interpreter host, comes back as an [`execution::ExecutionResult`],
//! is graded by [`grader::run_tests`], and finished levels feed
//! [`progression`] and [`achievements`].

pub mod achievements;
pub mod config;
pub mod content;
pub mod execution;
pub mod grader;
pub mod process;
pub mod progression;
pub mod protocol;
pub mod session;
pub mod store;
