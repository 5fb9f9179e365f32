//! Loop prevention.
//!
//! Two bots answering each other, or one user spamming a trigger, show up as
//! a run of replies initiated by very few distinct users. Once detected, the
//! context stays muted until a debounce period passes without a new
//! detection.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::LoopConfig;
use crate::hooks::ReceiveGuard;
use crate::receiver::Turn;
use crate::session::ContextState;

/// Per-context reply history.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Initiators of the latest replies, newest first.
    initiators: VecDeque<String>,
    /// Time of the last detection, cleared by the next reply.
    detected_at: Option<DateTime<Utc>>,
}

impl LoopState {
    /// Tracked initiators, newest first.
    #[must_use]
    pub fn initiators(&self) -> Vec<&str> {
        self.initiators.iter().map(String::as_str).collect()
    }

    #[must_use]
    pub const fn detected_at(&self) -> Option<DateTime<Utc>> {
        self.detected_at
    }
}

/// Vetoes receives while the context looks like a reply loop.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    rules: Vec<LoopConfig>,
    memory: usize,
}

impl LoopGuard {
    #[must_use]
    pub fn new(rules: Vec<LoopConfig>) -> Self {
        let memory = rules.iter().map(|rule| rule.length).max().unwrap_or(0);
        Self { rules, memory }
    }

    fn detects(&self, rule: &LoopConfig, state: &LoopState, now: DateTime<Utc>) -> bool {
        if state.initiators.len() < rule.length {
            return false;
        }
        let distinct: HashSet<&str> = state
            .initiators
            .iter()
            .take(rule.length)
            .map(String::as_str)
            .collect();
        if distinct.len() > rule.participants {
            return false;
        }
        let debounce = Duration::milliseconds(i64::try_from(rule.debounce_ms).unwrap_or(i64::MAX));
        match state.detected_at {
            None => true,
            Some(at) => now - at < debounce,
        }
    }
}

impl ReceiveGuard for LoopGuard {
    fn name(&self) -> &str {
        "loop"
    }

    fn init_context(&self, context: &mut ContextState) {
        context.extensions.insert(LoopState {
            initiators: VecDeque::with_capacity(self.memory + 1),
            detected_at: None,
        });
    }

    fn veto(&self, turn: &Turn<'_>, context: &mut ContextState, now: DateTime<Utc>) -> bool {
        let state = context.extensions.get_or_insert_with(LoopState::default);
        if self.rules.iter().any(|rule| self.detects(rule, state, now)) {
            state.detected_at = Some(now);
            debug!(context = %turn.message.context_id, "reply loop detected");
            return true;
        }
        false
    }

    fn after_send(&self, turn: &Turn<'_>, context: &mut ContextState, _now: DateTime<Utc>) {
        let state = context.extensions.get_or_insert_with(LoopState::default);
        state.initiators.push_front(turn.message.user.id.clone());
        state.initiators.truncate(self.memory);
        state.detected_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::tests::turn_for;
    use crate::session::{Message, User};

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn guard() -> LoopGuard {
        LoopGuard::new(vec![LoopConfig {
            participants: 1,
            length: 3,
            debounce_ms: 60_000,
        }])
    }

    #[test]
    fn single_initiator_run_is_muted_until_debounce_passes() {
        let guard = guard();
        let alice = Message::new("g", User::new("alice", "Alice"), "hi");
        let turn = turn_for(&alice);
        let mut context = ContextState::new("g");
        guard.init_context(&mut context);

        let t0 = start();
        for i in 0..3 {
            let now = t0 + Duration::seconds(i);
            assert!(!guard.veto(&turn, &mut context, now));
            guard.after_send(&turn, &mut context, now);
        }

        let t1 = t0 + Duration::seconds(10);
        assert!(guard.veto(&turn, &mut context, t1));
        // Each detection refreshes the debounce window.
        assert!(guard.veto(&turn, &mut context, t1 + Duration::seconds(59)));
        assert!(guard.veto(&turn, &mut context, t1 + Duration::seconds(118)));
        assert!(!guard.veto(&turn, &mut context, t1 + Duration::seconds(178)));
    }

    #[test]
    fn another_user_breaks_the_run() {
        let guard = guard();
        let alice = Message::new("g", User::new("alice", "Alice"), "hi");
        let bob = Message::new("g", User::new("bob", "Bob"), "hi");
        let alice_turn = turn_for(&alice);
        let bob_turn = turn_for(&bob);
        let mut context = ContextState::new("g");

        let t0 = start();
        for _ in 0..3 {
            guard.after_send(&alice_turn, &mut context, t0);
        }
        assert!(guard.veto(&alice_turn, &mut context, t0));

        guard.after_send(&bob_turn, &mut context, t0);
        assert!(!guard.veto(&alice_turn, &mut context, t0 + Duration::seconds(1)));

        let state = context.extensions.get::<LoopState>().unwrap();
        assert_eq!(state.initiators(), vec!["bob", "alice", "alice"]);
        assert!(state.detected_at().is_none());
    }
}
