//! Conversation contexts and the collaborator interfaces of a turn.
//!
//! Platform adapters deliver every inbound message as a [`Message`]; the
//! engine answers through a [`Responder`]. State that must survive across
//! turns of one conversation lives in a [`ContextState`], created lazily by
//! the [`SessionRegistry`] the first time a context is seen.
//!
//! Context state is extensible: each guard stores its own typed record in
//! [`Extensions`], initialized once through the guard's `init_context`
//! callback when the context is created.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{TeachError, TeachResult};

/// The sender of a message or the operator of an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub authority: u8,
    /// Ignored users never trigger dialogues.
    pub ignored: bool,
}

impl User {
    /// A regular user with authority 1.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            authority: 1,
            ignored: false,
        }
    }

    /// Copy with a different authority level.
    #[must_use]
    pub fn with_authority(mut self, authority: u8) -> Self {
        self.authority = authority;
        self
    }
}

/// A uniform inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Conversation the message belongs to; also the guild used for scoping.
    pub context_id: String,
    pub user: User,
    /// Plain text content; empty for media-only messages.
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(context_id: impl Into<String>, user: User, content: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            user,
            content: content.into(),
        }
    }
}

/// Outbound side of a conversation, supplied by the host bot.
pub trait Responder {
    /// Markup mentioning everybody.
    fn mention_all(&self) -> String {
        "@all".to_string()
    }

    /// Markup mentioning one user.
    fn mention(&self, user_id: &str) -> String {
        format!("@{user_id}")
    }

    /// Markup mentioning the bot itself.
    fn mention_self(&self) -> String;

    /// Deliver one message.
    fn send(&mut self, content: &str) -> TeachResult<()>;

    /// Run a bot command on behalf of `executor`.
    fn execute(&mut self, command: &str, executor: &str) -> TeachResult<()>;
}

/// Responder that records everything it is asked to do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferedResponder {
    pub self_id: String,
    pub sent: Vec<String>,
    /// `(command, executor)` pairs.
    pub executed: Vec<(String, String)>,
}

impl BufferedResponder {
    #[must_use]
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            ..Self::default()
        }
    }

    /// Take the recorded messages, leaving the buffer empty.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }
}

impl Responder for BufferedResponder {
    fn mention_self(&self) -> String {
        self.mention(&self.self_id)
    }

    fn send(&mut self, content: &str) -> TeachResult<()> {
        self.sent.push(content.to_string());
        Ok(())
    }

    fn execute(&mut self, command: &str, executor: &str) -> TeachResult<()> {
        self.executed.push((command.to_string(), executor.to_string()));
        Ok(())
    }
}

/// Type-keyed map of per-context extension records.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Extensions {
    /// Insert or replace the record of type `T`.
    pub fn insert<T: Any + Send>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    #[must_use]
    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.map.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    /// The record of type `T`, created with `init` if absent.
    pub fn get_or_insert_with<T: Any + Send, F: FnOnce() -> T>(&mut self, init: F) -> &mut T {
        self.map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut()
            .expect("extension stored under its own TypeId")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// State shared by all turns of one conversation context.
#[derive(Debug)]
pub struct ContextState {
    pub id: String,
    pub extensions: Extensions,
}

impl ContextState {
    /// A fresh state with no extensions.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            extensions: Extensions::default(),
        }
    }
}

/// Shared handle to one context.
pub type ContextHandle = Arc<Mutex<ContextState>>;

/// Lazily populated registry of conversation contexts.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    contexts: Mutex<HashMap<String, ContextHandle>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for `id`, running `init` exactly once on creation.
    pub fn context<F>(&self, id: &str, init: F) -> TeachResult<ContextHandle>
    where
        F: FnOnce(&mut ContextState),
    {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| TeachError::internal("session registry lock poisoned"))?;
        if let Some(handle) = contexts.get(id) {
            return Ok(Arc::clone(handle));
        }
        let mut state = ContextState::new(id);
        init(&mut state);
        let handle = Arc::new(Mutex::new(state));
        contexts.insert(id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Run `f` against the context state under its lock.
    ///
    /// Keep `f` short and synchronous: never call the store or a responder
    /// while holding the lock.
    pub fn with_context<F, I, R>(&self, id: &str, init: I, f: F) -> TeachResult<R>
    where
        I: FnOnce(&mut ContextState),
        F: FnOnce(&mut ContextState) -> R,
    {
        let handle = self.context(id, init)?;
        let mut state = handle
            .lock()
            .map_err(|_| TeachError::internal(format!("context lock poisoned: {id}")))?;
        Ok(f(&mut state))
    }

    /// Number of known contexts.
    pub fn len(&self) -> usize {
        self.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
