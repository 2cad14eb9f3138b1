//! Audit logging.
//!
//! Every field-level mutation made by the executor, rollback, and the manual
//! link/ignore paths is recorded as an [`AuditLogEntry`]. The log is
//! append-only: there is no API to update or delete individual entries.
//!
//! # Usage
//!
//! ```ignore
//! let logger = AuditLogger::new(storage, scope);
//! logger.record(vec![
//!     AuditLogEntry::new(&scope, "T-1", Platform::Tracker, AuditAction::Created, "alice")
//!         .with_change(field::ID, None, Some("SEC-42".to_string())),
//! ])?;
//! let csv = logger.export_csv(&AuditFilter::for_ticket("T-1"))?;
//! ```

pub mod csv;
pub mod types;

pub use types::{AuditAction, AuditFilter, AuditLogEntry};

use std::io::Write;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::Storage;
use crate::types::Scope;

#[derive(Clone)]
pub struct AuditLogger {
    storage: Arc<dyn Storage>,
    scope: Scope,
}

impl AuditLogger {
    pub fn new(storage: Arc<dyn Storage>, scope: Scope) -> Self {
        Self { storage, scope }
    }

    /// Append entries in one write.
    pub fn record(&self, entries: Vec<AuditLogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &entries {
            tracing::debug!(
                ticket_id = %entry.ticket_id,
                platform = %entry.platform,
                action = %entry.action,
                field = entry.field_name.as_deref().unwrap_or(""),
                "audit"
            );
        }
        self.storage.append_audit(&entries)
    }

    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        self.storage.query_audit(&self.scope, filter)
    }

    pub fn export_csv(&self, filter: &AuditFilter) -> Result<String> {
        Ok(csv::format_csv(&self.query(filter)?))
    }

    /// Stream the export into `writer`.
    pub fn write_csv<W: Write>(&self, writer: &mut W, filter: &AuditFilter) -> Result<()> {
        csv::write_csv(writer, &self.query(filter)?)?;
        Ok(())
    }
}
