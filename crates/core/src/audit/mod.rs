//! Audit trail for platform operations.
//!
//! Audit rows record WHAT happened and WHEN it happened (`timestamp`),
//! separately from when the row was written (`created_at`, set by the
//! database). Entries are written after the business transaction commits.

pub mod event;
pub mod logger;
pub mod repository;
pub mod traits;

pub use event::{AuditEvent, EventSeverity, EventType};
pub use logger::AuditLogger;
pub use repository::DatabaseAuditRepository;
pub use traits::{AuditBackend, AuditFilter, SortOrder};
