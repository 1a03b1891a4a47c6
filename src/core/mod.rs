//! Core export orchestration
//!
//! # Modules
//!
//! - [`exporter`] - Durable queue and single-flight scheduling on the agent side
//! - [`supervisor`] - Worker subprocess spawning, cancellation and crash capture
//! - [`worker`] - Concurrent project processing inside the worker process
//! - [`session`] - Export sessions, cursors and checkpoints
//! - [`events`] - Control-plane events
//!
//! # Export Workflow
//!
//! 1. **Admit**: reject stale or malformed requests, persist the rest
//! 2. **Prepare**: back up or restore cursors and checkpoints
//! 3. **Run**: spawn the `export` worker with parameters in private temp files
//! 4. **Process**: the worker fans projects out over a bounded pool
//! 5. **Upload**: push produced files and the worker log
//! 6. **Report**: drop the backup on success and publish the terminal event

pub mod events;
pub mod exporter;
pub mod session;
pub mod supervisor;
pub mod worker;
