//! Error types for the registry engine

use thiserror::Error;

/// Result type used across the registry engine
pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// The identifier sequence could not be locked for a read-increment-write.
    /// Retry the whole create operation.
    #[error("Could not allocate a {class} identifier atomically")]
    AllocationConflict { class: String },

    /// A house/father/mother/spouse reference points at a record that does not exist
    #[error("Broken {relation} reference to key {key}")]
    BrokenRelationReference { relation: String, key: i64 },

    /// Entity invariant violated before persistence
    #[error("Validation error: {0}")]
    Validation(String),

    /// Query is missing a required parameter
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn broken(relation: &str, key: i64) -> Self {
        RegistryError::BrokenRelationReference {
            relation: relation.to_string(),
            key,
        }
    }

    /// Only allocation conflicts are worth retrying; everything else is
    /// either client input or a store failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::AllocationConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_allocation_conflict_is_retryable() {
        let conflict = RegistryError::AllocationConflict {
            class: "Member".to_string(),
        };
        assert!(conflict.is_retryable());

        assert!(!RegistryError::Validation("bad".to_string()).is_retryable());
        assert!(!RegistryError::InvalidQuery("missing".to_string()).is_retryable());
        assert!(!RegistryError::broken("father", 7).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = RegistryError::broken("spouse", 42);
        assert_eq!(err.to_string(), "Broken spouse reference to key 42");

        let err = RegistryError::AllocationConflict {
            class: "House".to_string(),
        };
        assert!(err.to_string().contains("House"));
    }
}
