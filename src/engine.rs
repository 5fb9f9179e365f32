//! Engine facade.
//!
//! [`Teach`] owns the corpus store, the hook registry, per-context session
//! state and the edit history, and hands borrowed views of them to the
//! receiver, editor and searcher for each request.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::config::TeachConfig;
use crate::dialogue::DialogueId;
use crate::edit::{Action, Editor, History, TeachArgs};
use crate::error::{TeachError, TeachResult};
use crate::format;
use crate::hooks::HookRegistry;
use crate::receiver::Receiver;
use crate::search::Searcher;
use crate::session::{Message, Responder, SessionRegistry, User};
use crate::storage::DialogueStore;
use crate::time::{Clock, SystemClock};

/// The dialogue engine.
pub struct Teach {
    config: TeachConfig,
    store: Arc<dyn DialogueStore>,
    hooks: HookRegistry,
    sessions: SessionRegistry,
    history: History,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl Teach {
    /// Create an engine on the system clock.
    pub fn new(config: TeachConfig, store: Arc<dyn DialogueStore>) -> TeachResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create an engine on an explicit clock.
    ///
    /// The built-in hooks are registered from `config`; more can be added
    /// through [`Teach::hooks_mut`] before the first message arrives.
    pub fn with_clock(
        config: TeachConfig,
        store: Arc<dyn DialogueStore>,
        clock: Arc<dyn Clock>,
    ) -> TeachResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            hooks: HookRegistry::builtin(&config),
            history: History::new(config.history_timeout_ms),
            sessions: SessionRegistry::new(),
            rng: Mutex::new(rng),
            config,
            store,
            clock,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &TeachConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DialogueStore> {
        &self.store
    }

    #[must_use]
    pub const fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Mutable hook access, for registering extensions.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Answer an inbound message, returning the dialogue that fired.
    pub fn receive(
        &self,
        message: &Message,
        responder: &mut dyn Responder,
    ) -> TeachResult<Option<DialogueId>> {
        self.receiver().receive(message, responder)
    }

    /// Run a parsed teach command and render its reply.
    pub fn execute(&self, operator: &User, args: &TeachArgs) -> TeachResult<String> {
        debug!(operator = %operator.id, action = ?args.action, "teach command");
        match args.action {
            Action::Search => self.searcher().search(args),
            Action::Review => {
                let entries = self.editor().review()?;
                Ok(format::review(&entries, self.clock.now()))
            }
            Action::Remove => {
                self.require_base(operator)?;
                Ok(self.editor().remove(&args.targets, operator)?.to_string())
            }
            Action::Revert => {
                self.require_base(operator)?;
                Ok(self.editor().revert(&args.targets, operator)?.to_string())
            }
            Action::Edit if args.targets.is_empty() => {
                self.require_base(operator)?;
                Ok(self.editor().create(args, operator)?.to_string())
            }
            Action::Edit if args.has_modifications() => {
                self.require_base(operator)?;
                Ok(self.editor().update(&args.targets, args, operator)?.to_string())
            }
            Action::Edit => self.detail(&args.targets),
        }
    }

    fn detail(&self, ids: &[DialogueId]) -> TeachResult<String> {
        let (rows, report) = self.editor().detail(ids)?;
        let mut sections: Vec<String> = rows
            .iter()
            .map(|d| format::detail(d, &self.hooks, &self.config))
            .collect();
        let summary = report.to_string();
        if !summary.is_empty() {
            sections.push(summary);
        }
        Ok(sections.join("\n\n"))
    }

    fn require_base(&self, operator: &User) -> TeachResult<()> {
        if operator.authority < self.config.authority.base {
            warn!(operator = %operator.id, authority = operator.authority, "edit refused");
            return Err(TeachError::permission("你的权限不足以编辑问答。"));
        }
        Ok(())
    }

    fn receiver(&self) -> Receiver<'_> {
        Receiver {
            config: &self.config,
            store: self.store.as_ref(),
            hooks: &self.hooks,
            sessions: &self.sessions,
            clock: self.clock.as_ref(),
            rng: &self.rng,
        }
    }

    fn editor(&self) -> Editor<'_> {
        Editor {
            config: &self.config,
            store: &self.store,
            hooks: &self.hooks,
            history: &self.history,
            clock: self.clock.as_ref(),
        }
    }

    fn searcher(&self) -> Searcher<'_> {
        Searcher {
            config: &self.config,
            store: self.store.as_ref(),
            hooks: &self.hooks,
        }
    }
}

impl std::fmt::Debug for Teach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teach")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("contexts", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorityConfig;
    use crate::dialogue::Dialogue;
    use crate::error::ValidationError;
    use crate::session::BufferedResponder;
    use crate::storage::InMemoryDialogueStore;
    use crate::time::ManualClock;

    fn engine(dialogues: Vec<Dialogue>) -> Teach {
        let config = TeachConfig {
            seed: Some(7),
            ..TeachConfig::default()
        };
        let store = Arc::new(InMemoryDialogueStore::with_dialogues(dialogues).unwrap());
        let clock = Arc::new(ManualClock::new(
            chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        Teach::with_clock(config, store, clock).unwrap()
    }

    fn operator(authority: u8) -> User {
        User::new("op", "Operator").with_authority(authority)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TeachConfig {
            throttle: vec![crate::config::ThrottleConfig {
                interval_ms: 0,
                responses: 1,
            }],
            ..TeachConfig::default()
        };
        let err = Teach::new(config, Arc::new(InMemoryDialogueStore::new())).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn edits_need_base_authority() {
        let teach = engine(Vec::new());
        let err = teach
            .execute(&operator(0), &TeachArgs::create("hi", "hello"))
            .unwrap_err();
        assert!(err.is_permission());
        assert_eq!(teach.store().count().unwrap(), 0);

        let reply = teach
            .execute(&operator(AuthorityConfig::default().base), &TeachArgs::create("hi", "hello"))
            .unwrap();
        assert_eq!(reply, "问答已添加，编号为 1。");
    }

    #[test]
    fn search_and_detail_need_no_authority() {
        let teach = engine(vec![Dialogue::new("hi", "hello")]);
        let reply = teach
            .execute(&operator(0), &TeachArgs::search(Some("hi"), None))
            .unwrap();
        assert_eq!(reply, "问题“hi”的回答如下：\n1. hello");

        let reply = teach.execute(&operator(0), &TeachArgs::targets([1, 9])).unwrap();
        assert!(reply.starts_with("编号为 1 的问答信息："));
        assert!(reply.ends_with("没有搜索到编号为 9 的问答。"));
    }

    #[test]
    fn remove_without_targets_is_rejected() {
        let teach = engine(Vec::new());
        let args = TeachArgs::default().with_action(Action::Remove);
        let err = teach.execute(&operator(5), &args).unwrap_err();
        assert!(matches!(err, TeachError::Validation(ValidationError::NoTarget)));
    }

    #[test]
    fn receive_goes_through_the_receiver() {
        let teach = engine(vec![Dialogue::new("hi", "hello")]);
        let mut out = BufferedResponder::new("bot");
        let message = Message::new("g", User::new("u", "U"), "HI ");
        assert_eq!(teach.receive(&message, &mut out).unwrap(), Some(DialogueId(1)));
        assert_eq!(out.sent, vec!["hello".to_string()]);
    }
}
