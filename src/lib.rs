// Hostagent - Export job scheduler and worker supervisor
// Copyright (c) 2025 Hostagent Contributors
// Licensed under the MIT License

//! # Hostagent
//!
//! A long-running agent that receives export jobs from a control plane and
//! runs each one in an isolated worker process on customer infrastructure.
//!
//! ## Overview
//!
//! - **Admitting** jobs into a durable, at-least-once queue, rejecting stale ones
//! - **Scheduling** exactly one export at a time, with state backup and restore
//!   around every attempt
//! - **Supervising** worker processes: parameters through private temp files,
//!   output tee'd and crash-captured, operator cancellation by process tree
//! - **Processing** projects inside the worker on a bounded pool with a
//!   failure threshold
//! - **Tracking** incremental progress through sessions whose cursor only
//!   advances when they complete
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Exporter, supervisor, worker, sessions and events
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostagent::core::supervisor::{ProcessRegistry, RunParams, RunnerOptions, SubcommandRunner};
//! use hostagent::core::events::StdoutPublisher;
//! use hostagent::core::worker::ExportResult;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> hostagent::domain::Result<()> {
//! let registry = Arc::new(ProcessRegistry::new());
//! let runner = SubcommandRunner::new(
//!     Arc::clone(&registry),
//!     Arc::new(StdoutPublisher::new()),
//!     RunnerOptions {
//!         state_root: "/var/lib/hostagent".into(),
//!         temp_dir: None,
//!         cancel_grace: Duration::from_secs(10),
//!         echo_output: false,
//!     },
//! )?;
//!
//! let params = RunParams::new("export", "job-1").capture_output();
//! let result: Option<ExportResult> = runner.run(params).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The library uses [`domain::AgentError`] for all errors. Operator
//! cancellation, worker crashes and invalid worker output are distinct
//! variants so callers can report them differently.

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
