//! Self-expiring edit history.
//!
//! Each dialogue id holds at most one entry: the snapshot taken before its
//! latest create, update or removal. Entries expire `timeout` after their
//! own timestamp. A newer entry for the same id supersedes the older one,
//! and its pending expiry is ignored because the timestamps no longer
//! agree.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::dialogue::{Dialogue, DialogueId};
use crate::error::{TeachError, TeachResult};

/// What produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "添加",
            Self::Modified => "修改",
            Self::Deleted => "删除",
        })
    }
}

/// A point-in-time snapshot of one dialogue.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// The dialogue as it was before the edit; after it for `Created`.
    pub backup: Dialogue,
    pub kind: HistoryKind,
    /// Operator user id.
    pub operator: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct HistoryState {
    entries: HashMap<DialogueId, HistoryEntry>,
    /// `(due, id, captured timestamp)`, due times ascending.
    expiry: VecDeque<(DateTime<Utc>, DialogueId, DateTime<Utc>)>,
}

/// Live history, keyed by dialogue id.
#[derive(Debug)]
pub struct History {
    timeout: Duration,
    state: Mutex<HistoryState>,
}

impl History {
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(i64::MAX)),
            state: Mutex::new(HistoryState::default()),
        }
    }

    fn lock(&self) -> TeachResult<std::sync::MutexGuard<'_, HistoryState>> {
        self.state
            .lock()
            .map_err(|_| TeachError::internal("history lock poisoned"))
    }

    fn expire(state: &mut HistoryState, now: DateTime<Utc>) {
        while state.expiry.front().is_some_and(|(due, _, _)| *due <= now) {
            let Some((_, id, captured)) = state.expiry.pop_front() else {
                break;
            };
            if state.entries.get(&id).is_some_and(|e| e.timestamp == captured) {
                state.entries.remove(&id);
            }
        }
    }

    /// Record entries, replacing any older entry for the same ids.
    pub fn record(&self, entries: impl IntoIterator<Item = HistoryEntry>, now: DateTime<Utc>) -> TeachResult<()> {
        let mut state = self.lock()?;
        Self::expire(&mut state, now);
        for entry in entries {
            let id = entry.backup.id;
            state.expiry.push_back((entry.timestamp + self.timeout, id, entry.timestamp));
            state.entries.insert(id, entry);
        }
        Ok(())
    }

    /// Live entries for `ids`, in the order given; ids without one are skipped.
    pub fn get(&self, ids: &[DialogueId], now: DateTime<Utc>) -> TeachResult<Vec<HistoryEntry>> {
        let mut state = self.lock()?;
        Self::expire(&mut state, now);
        Ok(ids.iter().filter_map(|id| state.entries.get(id).cloned()).collect())
    }

    /// Drop the entries for `ids`.
    pub fn forget(&self, ids: &[DialogueId]) -> TeachResult<()> {
        let mut state = self.lock()?;
        for id in ids {
            state.entries.remove(id);
        }
        Ok(())
    }

    /// Every live entry, newest first.
    pub fn list(&self, now: DateTime<Utc>) -> TeachResult<Vec<HistoryEntry>> {
        let mut state = self.lock()?;
        Self::expire(&mut state, now);
        let mut entries: Vec<HistoryEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.backup.id.cmp(&a.backup.id))
        });
        Ok(entries)
    }
}
