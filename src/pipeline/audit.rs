//! Query Audit - in-memory record of what ran and how it went

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Audit entry for one answered request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry ID
    pub id: String,

    /// Normalized question
    pub question: String,

    /// Planner domain tag, absent on fast paths
    pub domain: Option<String>,

    /// Executed SQL
    pub sql: String,

    /// Rows returned
    pub row_count: usize,

    /// Wall time for the whole request
    pub elapsed_ms: f64,

    /// Timestamp
    pub timestamp: u64,
}

/// In-memory bounded audit log (nothing is persisted; the service owns no
/// state beyond the process)
pub struct QueryAudit {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
    max_entries: usize,
}

impl QueryAudit {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    /// Record an entry, evicting the oldest at capacity
    pub fn log(
        &self,
        question: String,
        domain: Option<String>,
        sql: String,
        row_count: usize,
        elapsed_ms: f64,
    ) -> String {
        let entry_id = uuid::Uuid::new_v4().to_string();
        let entry = AuditEntry {
            id: entry_id.clone(),
            question,
            domain,
            sql,
            row_count,
            elapsed_ms,
            timestamp: Self::now_timestamp(),
        };

        let mut entries = self.entries.write().unwrap();
        entries.push(entry);
        if entries.len() > self.max_entries {
            entries.remove(0);
        }
        entry_id
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().unwrap().clone()
    }

    fn now_timestamp() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for QueryAudit {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_and_read_back() {
        let audit = QueryAudit::new(10);
        let id = audit.log("q".into(), Some("lending".into()), "SELECT 1".into(), 3, 12.5);
        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].row_count, 3);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let audit = QueryAudit::new(2);
        audit.log("one".into(), None, "SELECT 1".into(), 0, 1.0);
        audit.log("two".into(), None, "SELECT 2".into(), 0, 1.0);
        audit.log("three".into(), None, "SELECT 3".into(), 0, 1.0);
        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question, "two");
    }
}
