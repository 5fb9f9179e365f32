//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`DialogueStore`]. It is intended for embedded usage, tests, and as a
//! reference implementation of query evaluation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::dialogue::{Dialogue, DialogueDiff, DialogueId};
use crate::observed::Record;
use crate::query::Condition;
use crate::storage::traits::{DialogueStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct DialogueState {
    by_id: BTreeMap<DialogueId, Dialogue>,
    last_id: u64,
}

impl DialogueState {
    fn bump(&mut self, id: DialogueId) {
        self.last_id = self.last_id.max(id.get());
    }
}

/// Thread-safe in-memory dialogue store.
#[derive(Debug, Default)]
pub struct InMemoryDialogueStore {
    state: RwLock<DialogueState>,
}

impl InMemoryDialogueStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with dialogues, assigning ids in order.
    pub fn with_dialogues(dialogues: impl IntoIterator<Item = Dialogue>) -> Result<Self, StorageError> {
        let store = Self::new();
        for dialogue in dialogues {
            store.create(dialogue)?;
        }
        Ok(store)
    }
}

impl DialogueStore for InMemoryDialogueStore {
    fn find(&self, condition: &Condition) -> Result<Vec<Dialogue>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("dialogue.find"))?;
        Ok(state
            .by_id
            .values()
            .filter(|d| condition.matches(d))
            .cloned()
            .collect())
    }

    fn get_by_ids(&self, ids: &[DialogueId]) -> Result<Vec<Dialogue>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("dialogue.get_by_ids"))?;
        let mut out: Vec<Dialogue> = ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        out.sort_by_key(|d| d.id);
        out.dedup_by_key(|d| d.id);
        Ok(out)
    }

    fn create(&self, mut dialogue: Dialogue) -> Result<Dialogue, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("dialogue.create"))?;
        let id = DialogueId(state.last_id + 1);
        if state.by_id.contains_key(&id) {
            return Err(StorageError::DuplicateKey(id.to_string()));
        }
        dialogue.id = id;
        state.bump(id);
        state.by_id.insert(id, dialogue.clone());
        Ok(dialogue)
    }

    fn update(&self, id: DialogueId, diff: &DialogueDiff) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("dialogue.update"))?;
        let current = state
            .by_id
            .get(&id)
            .ok_or(StorageError::DialogueNotFound(id))?;

        // Apply to a copy so a bad value leaves the row untouched.
        let mut next = current.clone();
        for (field, value) in diff {
            next.apply(*field, value.clone())
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        }
        state.by_id.insert(id, next);
        Ok(())
    }

    fn upsert(&self, dialogues: Vec<Dialogue>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("dialogue.upsert"))?;
        for dialogue in dialogues {
            state.bump(dialogue.id);
            state.by_id.insert(dialogue.id, dialogue);
        }
        Ok(())
    }

    fn remove(&self, ids: &[DialogueId]) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("dialogue.remove"))?;
        for id in ids {
            state.by_id.remove(id);
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("dialogue.count"))?;
        Ok(state.by_id.len())
    }
}
