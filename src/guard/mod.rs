//! Built-in receive guards and weight gates.

mod loop_guard;
mod throttle;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TeachConfig;
use crate::hooks::{ReceiveGuard, WeightGate};
use crate::receiver::Turn;
use crate::session::ContextState;

pub use loop_guard::{LoopGuard, LoopState};
pub use throttle::{ThrottleGuard, ThrottleState};

/// Ignores messages without text, e.g. image-only messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyContentGuard;

impl ReceiveGuard for EmptyContentGuard {
    fn name(&self) -> &str {
        "empty-content"
    }

    fn veto(&self, turn: &Turn<'_>, _context: &mut ContextState, _now: DateTime<Utc>) -> bool {
        turn.message.content.trim().is_empty()
    }
}

/// Makes every candidate weightless for ignored users.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoredUserGate;

impl WeightGate for IgnoredUserGate {
    fn name(&self) -> &str {
        "ignored-user"
    }

    fn blocks(&self, turn: &Turn<'_>) -> bool {
        turn.message.user.ignored
    }
}

/// Guards enabled by `config`, in dispatch order.
#[must_use]
pub fn builtin_guards(config: &TeachConfig) -> Vec<Arc<dyn ReceiveGuard>> {
    let mut guards: Vec<Arc<dyn ReceiveGuard>> = vec![Arc::new(EmptyContentGuard)];
    if !config.throttle.is_empty() {
        guards.push(Arc::new(ThrottleGuard::new(config.throttle.clone())));
    }
    if !config.prevent_loop.is_empty() {
        guards.push(Arc::new(LoopGuard::new(config.prevent_loop.clone())));
    }
    guards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::tests::turn_for;
    use crate::session::{Message, User};

    #[test]
    fn empty_content_is_vetoed() {
        let message = Message::new("g", User::new("u", "U"), "  ");
        let turn = turn_for(&message);
        let mut context = ContextState::new("g");
        assert!(EmptyContentGuard.veto(&turn, &mut context, Utc::now()));
    }

    #[test]
    fn ignored_users_are_gated() {
        let mut user = User::new("u", "U");
        user.ignored = true;
        let message = Message::new("g", user, "hi");
        assert!(IgnoredUserGate.blocks(&turn_for(&message)));
    }

    #[test]
    fn builtin_guards_follow_config() {
        let names = |config: &TeachConfig| -> Vec<String> {
            builtin_guards(config).iter().map(|g| g.name().to_string()).collect()
        };
        assert_eq!(names(&TeachConfig::default()), vec!["empty-content", "loop"]);
        let config = TeachConfig {
            throttle: vec![crate::config::ThrottleConfig {
                interval_ms: 1_000,
                responses: 1,
            }],
            prevent_loop: Vec::new(),
            ..TeachConfig::default()
        };
        assert_eq!(names(&config), vec!["empty-content", "throttle"]);
    }
}
