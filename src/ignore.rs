//! Ignore registry.
//!
//! Per-user, per-project set of ticket ids suppressed from reconciliation.
//! Temporary entries are dropped by [`IgnoreRegistry::clear_temporary`];
//! permanent entries stay until removed explicitly.

use std::collections::BTreeSet;
use std::sync::Arc;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditLogEntry, AuditLogger};
use crate::error::{BridgeError, Result};
use crate::storage::Storage;
use crate::types::{IgnoreType, IgnoredTicket, Scope};

/// Add or remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreAction {
    Add,
    Remove,
}

enum_display_fromstr!(IgnoreAction, BridgeError::Other, {
    Add => "add",
    Remove => "remove" | "rm",
});

#[derive(Clone)]
pub struct IgnoreRegistry {
    storage: Arc<dyn Storage>,
    audit: AuditLogger,
    scope: Scope,
}

impl IgnoreRegistry {
    pub fn new(storage: Arc<dyn Storage>, audit: AuditLogger, scope: Scope) -> Self {
        Self {
            storage,
            audit,
            scope,
        }
    }

    pub fn list(&self) -> Result<Vec<IgnoredTicket>> {
        self.storage.list_ignored(&self.scope)
    }

    /// Ids currently suppressed.
    pub fn ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.list()?.into_iter().map(|i| i.ticket_id).collect())
    }

    /// Ignore `ticket_id`. Re-adding with a different type retypes the entry.
    pub fn add(&self, ticket_id: &str, ignore_type: IgnoreType, actor: &str) -> Result<bool> {
        let entry = IgnoredTicket {
            user: self.scope.user.clone(),
            project: self.scope.project.clone(),
            ticket_id: ticket_id.to_string(),
            ignore_type,
            created_at: Timestamp::now(),
        };
        let changed = self.storage.add_ignored(&entry)?;
        if changed {
            tracing::info!(ticket_id, %ignore_type, "ticket ignored");
            self.audit.record(vec![
                AuditLogEntry::new(
                    &self.scope,
                    ticket_id,
                    self.scope.platform_of(ticket_id),
                    AuditAction::Ignored,
                    actor,
                )
                .with_new_value(ignore_type.as_str()),
            ])?;
        }
        Ok(changed)
    }

    pub fn remove(&self, ticket_id: &str, actor: &str) -> Result<bool> {
        let Some(removed) = self.storage.remove_ignored(&self.scope, ticket_id)? else {
            return Ok(false);
        };
        tracing::info!(ticket_id, "ticket no longer ignored");
        let mut entry = AuditLogEntry::new(
            &self.scope,
            ticket_id,
            self.scope.platform_of(ticket_id),
            AuditAction::Unignored,
            actor,
        );
        entry.old_value = Some(removed.ignore_type.as_str().to_string());
        self.audit.record(vec![entry])?;
        Ok(true)
    }

    /// Drop every temporary entry; permanent entries are kept.
    pub fn clear_temporary(&self, actor: &str) -> Result<Vec<IgnoredTicket>> {
        let removed = self.storage.clear_temporary_ignored(&self.scope)?;
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "cleared temporary ignores");
            let entries = removed
                .iter()
                .map(|i| {
                    let mut entry = AuditLogEntry::new(
                        &self.scope,
                        &i.ticket_id,
                        self.scope.platform_of(&i.ticket_id),
                        AuditAction::Unignored,
                        actor,
                    );
                    entry.old_value = Some(i.ignore_type.as_str().to_string());
                    entry
                })
                .collect();
            self.audit.record(entries)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::storage::SqliteStorage;

    fn registry() -> IgnoreRegistry {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_memory().unwrap());
        let scope = Scope::new("alice", "1200:SEC");
        let audit = AuditLogger::new(Arc::clone(&storage), scope.clone());
        IgnoreRegistry::new(storage, audit, scope)
    }

    #[test]
    fn test_clear_temporary_keeps_permanent() {
        let reg = registry();
        reg.add("T-1", IgnoreType::Temporary, "alice").unwrap();
        reg.add("T-2", IgnoreType::Permanent, "alice").unwrap();

        let cleared = reg.clear_temporary("alice").unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].ticket_id, "T-1");
        assert_eq!(reg.ids().unwrap(), BTreeSet::from(["T-2".to_string()]));
    }

    #[test]
    fn test_add_and_remove_are_audited() {
        let reg = registry();
        assert!(reg.add("SEC-3", IgnoreType::Permanent, "alice").unwrap());
        assert!(!reg.add("SEC-3", IgnoreType::Permanent, "alice").unwrap());
        assert!(reg.remove("SEC-3", "alice").unwrap());
        assert!(!reg.remove("SEC-3", "alice").unwrap());

        let entries = reg.audit.query(&AuditFilter::for_ticket("SEC-3")).unwrap();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Ignored, AuditAction::Unignored]);
        assert!(entries.iter().all(|e| e.platform == crate::types::Platform::Tracker));
    }

    #[test]
    fn test_ignore_action_parse() {
        assert_eq!("add".parse::<IgnoreAction>().unwrap(), IgnoreAction::Add);
        assert_eq!("rm".parse::<IgnoreAction>().unwrap(), IgnoreAction::Remove);
    }
}
