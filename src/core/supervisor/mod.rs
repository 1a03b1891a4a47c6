//! Worker process supervision
//!
//! - [`runner`] spawns a worker, tees its output, captures crashes
//! - [`registry`] tracks the cancellable worker
//! - [`canceller`] terminates a process tree

pub mod canceller;
pub mod log_sink;
pub mod registry;
pub mod runner;

pub use canceller::{kill_process_tree, signal_process_tree, TreeSignal};
pub use log_sink::{LogSink, OutputStream, TracingLogSink};
pub use registry::{ProcessRegistry, Registration};
pub use runner::{RunOutput, RunParams, RunnerOptions, SubcommandRunner, EXPORT_COMMAND};
