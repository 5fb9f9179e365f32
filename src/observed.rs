//! Change-tracked records.
//!
//! [`Observed`] wraps a plain record and remembers which fields were written
//! since the last [`Observed::commit`]. Committing hands exactly that change
//! set to a [`Persist`] implementation, so a backend only ever writes dirty
//! columns.
//!
//! The wrapper never copies the change set anywhere else: callers must treat
//! the diff returned by `commit` as the complete and only change-set since
//! the prior commit.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{ExecutionError, TeachError, ValidationError};
use crate::storage::StorageError;

/// A record whose fields can be read and written by name.
pub trait Record: Clone {
    /// Field selector.
    type Field: Copy + Ord + fmt::Debug + fmt::Display;
    /// A value of any field.
    type Value: Clone + PartialEq + fmt::Debug;

    /// Read one field.
    fn field(&self, field: Self::Field) -> Self::Value;

    /// Write one field. Fails when the value kind does not fit the field.
    fn apply(&mut self, field: Self::Field, value: Self::Value) -> Result<(), ValidationError>;
}

/// Dirty fields and their new values.
pub type Diff<T> = BTreeMap<<T as Record>::Field, <T as Record>::Value>;

/// Sink for committed change sets.
pub trait Persist<T: Record>: Send + Sync {
    /// Persist `diff`; `record` is the state after the diff was applied.
    fn persist(&self, record: &T, diff: &Diff<T>) -> Result<(), StorageError>;
}

/// A record wrapper tracking field writes.
pub struct Observed<T: Record> {
    record: T,
    diff: Diff<T>,
    /// Committed values of the fields in `diff`.
    baseline: Diff<T>,
    persister: Option<Arc<dyn Persist<T>>>,
}

impl<T: Record> Observed<T> {
    /// Track `record` without a persister; `commit` only clears the diff.
    #[must_use]
    pub fn new(record: T) -> Self {
        Self {
            record,
            diff: Diff::<T>::new(),
            baseline: Diff::<T>::new(),
            persister: None,
        }
    }

    /// Track `record`, committing through `persister`.
    #[must_use]
    pub fn wrap(record: T, persister: Arc<dyn Persist<T>>) -> Self {
        Self {
            record,
            diff: Diff::<T>::new(),
            baseline: Diff::<T>::new(),
            persister: Some(persister),
        }
    }

    /// Write a field. Returns whether the value changed.
    ///
    /// Writing a field back to its committed value clears it from the diff.
    pub fn set(&mut self, field: T::Field, value: T::Value) -> Result<bool, ValidationError> {
        let previous = self.record.field(field);
        if previous == value {
            return Ok(false);
        }
        self.record.apply(field, value)?;
        let committed = self.baseline.entry(field).or_insert(previous);
        // Compare what the record holds now, so normalizing setters are reflected.
        let current = self.record.field(field);
        if *committed == current {
            self.baseline.remove(&field);
            self.diff.remove(&field);
        } else {
            self.diff.insert(field, current);
        }
        Ok(true)
    }

    /// Edit a field in place through a closure over its current value.
    pub fn update<F>(&mut self, field: T::Field, edit: F) -> Result<bool, ValidationError>
    where
        F: FnOnce(&mut T::Value),
    {
        let mut value = self.record.field(field);
        edit(&mut value);
        self.set(field, value)
    }

    /// Returns true if any field was written since the last commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.diff.is_empty()
    }

    /// Returns true if `field` was written since the last commit.
    #[must_use]
    pub fn is_field_dirty(&self, field: T::Field) -> bool {
        self.diff.contains_key(&field)
    }

    /// The pending change set.
    #[must_use]
    pub fn diff(&self) -> &Diff<T> {
        &self.diff
    }

    /// Hand the pending diff to the persister and clear it.
    ///
    /// An empty diff performs no persistence call. A failed persist keeps
    /// the diff so the caller may retry.
    pub fn commit(&mut self) -> Result<Diff<T>, StorageError> {
        if self.diff.is_empty() {
            return Ok(Diff::<T>::new());
        }
        let diff = self.diff.clone();
        if let Some(persister) = &self.persister {
            persister.persist(&self.record, &diff)?;
        }
        self.diff.clear();
        self.baseline.clear();
        Ok(diff)
    }

    /// Apply an external patch directly to the backing record.
    ///
    /// Rejects the whole patch if any patched field is dirty, since the
    /// uncommitted write would otherwise be silently discarded. The patch
    /// applies entirely or not at all.
    pub fn merge(&mut self, patch: Diff<T>) -> Result<(), TeachError> {
        if let Some(field) = patch.keys().find(|f| self.diff.contains_key(f)) {
            return Err(ExecutionError::DirtyMerge {
                field: field.to_string(),
            }
            .into());
        }
        let mut merged = self.record.clone();
        for (field, value) in patch {
            merged.apply(field, value)?;
        }
        self.record = merged;
        Ok(())
    }

    /// Unwrap, discarding any uncommitted diff.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.record
    }
}

impl<T: Record> Deref for Observed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T: Record + fmt::Debug> fmt::Debug for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("record", &self.record)
            .field("diff", &self.diff)
            .field("persisted", &self.persister.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::dialogue::{Dialogue, DialogueField, FieldValue};

    #[derive(Default)]
    struct RecordingPersister {
        calls: Mutex<Vec<Diff<Dialogue>>>,
        fail: bool,
    }

    impl Persist<Dialogue> for RecordingPersister {
        fn persist(&self, _record: &Dialogue, diff: &Diff<Dialogue>) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::BackendError("offline".to_string()));
            }
            self.calls.lock().unwrap().push(diff.clone());
            Ok(())
        }
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn commit_hands_exact_diff_then_clears() {
        let persister = Arc::new(RecordingPersister::default());
        let mut obs = Observed::wrap(Dialogue::new("q", "a"), persister.clone());

        assert!(obs.set(DialogueField::Answer, text("x")).unwrap());
        assert!(obs.is_dirty());

        let diff = obs.commit().unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get(&DialogueField::Answer), Some(&text("x")));
        assert_eq!(obs.answer, "x");

        let again = obs.commit().unwrap();
        assert!(again.is_empty());
        assert_eq!(persister.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn unchanged_write_is_not_dirty() {
        let mut obs = Observed::new(Dialogue::new("q", "a"));
        assert!(!obs.set(DialogueField::Answer, text("a")).unwrap());
        assert!(!obs.is_dirty());
    }

    #[test]
    fn writing_back_the_committed_value_clears_the_field() {
        let persister = Arc::new(RecordingPersister::default());
        let mut obs = Observed::wrap(Dialogue::new("q", "a"), persister.clone());

        obs.set(DialogueField::Answer, text("x")).unwrap();
        obs.set(DialogueField::Answer, text("y")).unwrap();
        obs.set(DialogueField::ProbA, FieldValue::Probability(0.5)).unwrap();
        assert!(obs.set(DialogueField::Answer, text("a")).unwrap());
        assert!(!obs.is_field_dirty(DialogueField::Answer));
        assert!(obs.is_dirty());

        obs.set(DialogueField::ProbA, FieldValue::Probability(0.0)).unwrap();
        assert!(!obs.is_dirty());
        assert!(obs.commit().unwrap().is_empty());
        assert!(persister.calls.lock().unwrap().is_empty());

        // After a commit the new value is the baseline.
        obs.set(DialogueField::Answer, text("b")).unwrap();
        obs.commit().unwrap();
        obs.set(DialogueField::Answer, text("a")).unwrap();
        assert_eq!(obs.diff().get(&DialogueField::Answer), Some(&text("a")));
    }

    #[test]
    fn update_tracks_collection_edits_with_normalization() {
        let mut obs = Observed::new(Dialogue::new("q", "a"));
        let changed = obs
            .update(DialogueField::Guilds, |value| {
                if let FieldValue::Guilds(guilds) = value {
                    guilds.push("z".to_string());
                    guilds.push("a".to_string());
                }
            })
            .unwrap();
        assert!(changed);
        assert_eq!(
            obs.diff().get(&DialogueField::Guilds),
            Some(&FieldValue::Guilds(vec!["a".to_string(), "z".to_string()]))
        );
    }

    #[test]
    fn failed_persist_keeps_diff() {
        let persister = Arc::new(RecordingPersister {
            fail: true,
            ..RecordingPersister::default()
        });
        let mut obs = Observed::wrap(Dialogue::new("q", "a"), persister);
        obs.set(DialogueField::Answer, text("x")).unwrap();
        assert!(obs.commit().is_err());
        assert!(obs.is_field_dirty(DialogueField::Answer));
    }

    #[test]
    fn merge_rejects_dirty_keys_and_applies_clean_ones() {
        let mut obs = Observed::new(Dialogue::new("q", "a"));
        obs.set(DialogueField::Answer, text("local")).unwrap();

        let mut patch = Diff::<Dialogue>::new();
        patch.insert(DialogueField::Answer, text("remote"));
        let err = obs.merge(patch).unwrap_err();
        assert!(matches!(
            err,
            TeachError::Execution(ExecutionError::DirtyMerge { ref field }) if field == "answer"
        ));
        assert_eq!(obs.answer, "local");

        let mut patch = Diff::<Dialogue>::new();
        patch.insert(DialogueField::ProbA, FieldValue::Probability(0.5));
        obs.merge(patch).unwrap();
        assert_eq!(obs.prob_a, 0.5);
        // Merged fields are not dirty.
        assert!(!obs.is_field_dirty(DialogueField::ProbA));
    }

    #[test]
    fn merge_is_all_or_nothing() {
        let mut obs = Observed::new(Dialogue::new("q", "a"));
        let mut patch = Diff::<Dialogue>::new();
        patch.insert(DialogueField::Answer, text("remote"));
        patch.insert(DialogueField::ProbA, text("not a probability"));

        let err = obs.merge(patch).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(obs.answer, "a");
        assert_eq!(obs.prob_a, 0.0);
    }
}
