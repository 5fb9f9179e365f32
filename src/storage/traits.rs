//! Abstract storage traits for the dialogue corpus.
//!
//! These traits define the contract that storage backends must implement.
//! By using traits, we enable:
//! - In-memory backends for testing and embedded use
//! - Database-backed stores owned by the host bot

use thiserror::Error;

use crate::dialogue::{Dialogue, DialogueDiff, DialogueId};
use crate::observed::{Diff, Persist};
use crate::query::Condition;

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Dialogue not found.
    #[error("Dialogue not found: {0}")]
    DialogueNotFound(DialogueId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage trait for the `dialogue` collection.
///
/// # Safety Considerations
/// - All mutations should be atomic where possible
/// - Implementations should handle concurrent access safely
/// - `find` must evaluate the condition deterministically; results are
///   returned in ascending id order
pub trait DialogueStore: Send + Sync {
    /// Find dialogues satisfying `condition`.
    fn find(&self, condition: &Condition) -> Result<Vec<Dialogue>, StorageError>;

    /// Fetch dialogues by id. Missing ids are skipped.
    fn get_by_ids(&self, ids: &[DialogueId]) -> Result<Vec<Dialogue>, StorageError>;

    /// Insert a new dialogue, assigning its id. The given id is ignored.
    fn create(&self, dialogue: Dialogue) -> Result<Dialogue, StorageError>;

    /// Apply a field-level diff to an existing dialogue.
    fn update(&self, id: DialogueId, diff: &DialogueDiff) -> Result<(), StorageError>;

    /// Insert or replace dialogues verbatim, keeping their ids.
    fn upsert(&self, dialogues: Vec<Dialogue>) -> Result<(), StorageError>;

    /// Delete dialogues by id. Missing ids are ignored.
    fn remove(&self, ids: &[DialogueId]) -> Result<(), StorageError>;

    /// Number of stored dialogues.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Commits [`Observed`](crate::observed::Observed) dialogue diffs to a store.
pub struct StorePersister<S: ?Sized> {
    store: std::sync::Arc<S>,
}

impl<S: ?Sized> StorePersister<S> {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: DialogueStore + ?Sized> Persist<Dialogue> for StorePersister<S> {
    fn persist(&self, record: &Dialogue, diff: &Diff<Dialogue>) -> Result<(), StorageError> {
        self.store.update(record.id, diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_dialogue_store_object_safe(_: &dyn DialogueStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::DialogueNotFound(DialogueId(3));
        assert!(err.to_string().contains("Dialogue not found: 3"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
