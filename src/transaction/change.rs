// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Buffered writes of one transaction. Changes are applied to the shared
// store on COMMIT and discarded on ROLLBACK.
//
// ============================================================================

use serde_json::Value;

/// A single buffered write
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Create or overwrite a key
    Put { key: String, value: Value },

    /// Remove a key
    Delete { key: String },
}

impl Change {
    /// Get the key affected by this change
    pub fn key(&self) -> &str {
        match self {
            Change::Put { key, .. } => key,
            Change::Delete { key } => key,
        }
    }

    /// The value visible to later reads in the same transaction
    pub fn value(&self) -> Option<&Value> {
        match self {
            Change::Put { value, .. } => Some(value),
            Change::Delete { .. } => None,
        }
    }
}
