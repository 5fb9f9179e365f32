//! Rolling response allowance per context.
//!
//! Every rule grants `responses` replies per `interval_ms`. A reply takes
//! one unit from every rule and gives it back exactly one interval later,
//! so the allowance recovers smoothly instead of resetting on a fixed
//! boundary.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::ThrottleConfig;
use crate::hooks::ReceiveGuard;
use crate::receiver::Turn;
use crate::session::ContextState;

/// Allowance of one rule in one context.
#[derive(Debug, Clone)]
struct Allowance {
    interval: Duration,
    remaining: i64,
    /// Due times of pending restorations, oldest first.
    restorations: VecDeque<DateTime<Utc>>,
}

/// Per-context throttle counters.
#[derive(Debug, Clone)]
pub struct ThrottleState {
    allowances: Vec<Allowance>,
}

impl ThrottleState {
    fn new(rules: &[ThrottleConfig]) -> Self {
        Self {
            allowances: rules
                .iter()
                .map(|rule| Allowance {
                    interval: Duration::milliseconds(i64::try_from(rule.interval_ms).unwrap_or(i64::MAX)),
                    remaining: i64::from(rule.responses),
                    restorations: VecDeque::new(),
                })
                .collect(),
        }
    }

    /// Give back every unit whose restoration is due.
    fn restore_due(&mut self, now: DateTime<Utc>) {
        for allowance in &mut self.allowances {
            while allowance.restorations.front().is_some_and(|due| *due <= now) {
                allowance.restorations.pop_front();
                allowance.remaining += 1;
            }
        }
    }

    fn exhausted(&self) -> bool {
        self.allowances.iter().any(|a| a.remaining <= 0)
    }

    fn consume(&mut self, now: DateTime<Utc>) {
        for allowance in &mut self.allowances {
            allowance.remaining -= 1;
            allowance.restorations.push_back(now + allowance.interval);
        }
    }

    /// Remaining allowance of each rule, in configuration order.
    #[must_use]
    pub fn remaining(&self) -> Vec<i64> {
        self.allowances.iter().map(|a| a.remaining).collect()
    }
}

/// Suppresses receives once any rule's allowance is spent.
#[derive(Debug, Clone)]
pub struct ThrottleGuard {
    rules: Vec<ThrottleConfig>,
}

impl ThrottleGuard {
    #[must_use]
    pub fn new(rules: Vec<ThrottleConfig>) -> Self {
        Self { rules }
    }

    fn state<'a>(&self, context: &'a mut ContextState) -> &'a mut ThrottleState {
        context
            .extensions
            .get_or_insert_with(|| ThrottleState::new(&self.rules))
    }
}

impl ReceiveGuard for ThrottleGuard {
    fn name(&self) -> &str {
        "throttle"
    }

    fn init_context(&self, context: &mut ContextState) {
        context.extensions.insert(ThrottleState::new(&self.rules));
    }

    fn veto(&self, turn: &Turn<'_>, context: &mut ContextState, now: DateTime<Utc>) -> bool {
        let state = self.state(context);
        state.restore_due(now);
        let exhausted = state.exhausted();
        if exhausted {
            debug!(context = %turn.message.context_id, "throttle allowance exhausted");
        }
        exhausted
    }

    fn after_send(&self, _turn: &Turn<'_>, context: &mut ContextState, now: DateTime<Utc>) {
        let state = self.state(context);
        state.restore_due(now);
        state.consume(now);
    }
}
