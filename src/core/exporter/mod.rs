//! Export scheduling on the agent side
//!
//! - [`queue`] durable at-least-once job queue
//! - [`scheduler`] single-flight [`Exporter`] driving each job to a terminal event
//! - [`backup`] state backup and restore around attempts
//! - [`executor`] worker execution through the subcommand runner
//! - [`translate`] backend to worker integration config
//! - [`upload`] upload of produced files

pub mod backup;
pub mod executor;
pub mod queue;
pub mod scheduler;
pub mod translate;
pub mod upload;

pub use backup::{BackupAction, StateBackup};
pub use executor::{ExecutorOutput, ExportExecutor, SubprocessExecutor};
pub use queue::{list_pending, wait_for_shutdown, Delivery, DurableQueue, QueueHandle};
pub use scheduler::{Exporter, ExporterOptions};
pub use translate::{ConfigTranslator, PassthroughTranslator};
pub use upload::{clear_export_dir, HttpUploader, UploadSummary, Uploader};

/// Directory under the state root that holds queued jobs
pub const QUEUE_DIR: &str = "queue";
