// Activity log module for the procurement workflow engine
//
// Append-only audit trail of every workflow, stage and milestone mutation.

pub mod log;
pub mod recorder;
pub mod types;

pub use log::{ActivityLog, JsonlActivityLog, MemoryActivityLog};
pub use recorder::AuditRecorder;
pub use types::{ActivityLogEntry, ActivityType, AuditStatus};
