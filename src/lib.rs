//! # dialogue-engine
//!
//! A stimulus-response rule engine for chat bots. The corpus is a set of
//! dialogues, each mapping a question (literal or regular expression) to an
//! answer template. Inbound messages are matched against the corpus, one
//! candidate is drawn by weight and its answer rendered, possibly chaining
//! into other dialogues. Operators edit the corpus live; every edit is kept
//! in a self-expiring history and can be reverted.
//!
//! ## Core Concepts
//!
//! - **Dialogue**: a trigger → answer rule with probabilities, a guild scope,
//!   an activity window and optional predecessors
//! - **Receiver**: normalizes a message, applies guards, queries, weighs,
//!   picks and renders
//! - **Guards**: per-context throttle and loop prevention
//! - **Editor**: create/update/remove/revert over diff-tracked records
//! - **Searcher**: listings with auto-merge, redirection expansion and paging
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dialogue_engine::{BufferedResponder, Dialogue, InMemoryDialogueStore, Message, Teach, TeachConfig, User};
//!
//! let store = InMemoryDialogueStore::with_dialogues([Dialogue::new("hi", "hello")])?;
//! let teach = Teach::new(TeachConfig::default(), Arc::new(store))?;
//!
//! let mut out = BufferedResponder::new("bot");
//! teach.receive(&Message::new("guild", User::new("u1", "Alice"), "Hi!"), &mut out)?;
//! assert_eq!(out.sent, ["hello"]);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod dialogue;
pub mod error;
pub mod observed;
pub mod time;

// Storage and queries
pub mod query;
pub mod storage;

// Extension points and per-context state
pub mod hooks;
pub mod session;

// Behavior
pub mod edit;
pub mod format;
pub mod guard;
pub mod receiver;
pub mod search;

// Entry points
pub mod engine;
pub mod runtime;

pub use config::{AuthorityConfig, LoopConfig, RuntimeConfig, TeachConfig, ThrottleConfig};
pub use dialogue::{Dialogue, DialogueDiff, DialogueField, DialogueFlags, DialogueId, FieldValue};
pub use error::{ExecutionError, TeachError, TeachResult, ValidationError};
pub use observed::{Diff, Observed, Persist, Record};
pub use time::{Clock, ManualClock, SystemClock, TimeWindow};

pub use query::{Condition, DialogueTest, PredicateContributor, QueryBuilder};
pub use storage::{DialogueStore, InMemoryDialogueStore, StorageError};

pub use hooks::{DetailHook, HookRegistry, ModifyHook, PermissionHook, ReceiveGuard, WeightGate};
pub use session::{BufferedResponder, ContextState, Message, Responder, SessionRegistry, User};

pub use edit::{Action, EditReport, HistoryEntry, HistoryKind, TeachArgs, TeachOptions};
pub use guard::{LoopGuard, ThrottleGuard};
pub use receiver::Turn;

pub use engine::Teach;
pub use runtime::{Delivery, Reply, Request, TeachRuntime};
