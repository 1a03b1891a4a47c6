//! Export sessions, their host and the cursor store

pub mod cursor;
pub mod host;
pub mod export_session;

pub use cursor::{CursorEntry, CursorStatus, CursorStore, CURSOR_FILE};
pub use host::{LocalSessionHost, SessionHost, SessionInfo, SessionNode, CHECKPOINT_DIR, EXPORT_DIR};
pub use export_session::{ExportSession, SessionContext, SessionRole};
