//! Typed extension points.
//!
//! Each extension point is a trait with a fixed signature and an ordered
//! list in [`HookRegistry`]. Dispatch order is registration order.
//!
//! | point | dispatch |
//! |---|---|
//! | [`ReceiveGuard::veto`] | first veto short-circuits |
//! | [`ReceiveGuard::after_send`] | fire-all |
//! | [`WeightGate`] | first block short-circuits |
//! | [`PredicateContributor`] | fire-all into one builder |
//! | [`ModifyHook::before_modify`] | sequential, first error returns |
//! | [`ModifyHook::modify`] | sequential, first error returns |
//! | [`PermissionHook`] | first denial short-circuits |
//! | [`DetailHook`] | fire-all into one output |

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TeachConfig;
use crate::dialogue::Dialogue;
use crate::edit::EditContext;
use crate::error::TeachResult;
use crate::observed::Observed;
use crate::query::{builtin_contributors, PredicateContributor};
use crate::receiver::Turn;
use crate::session::ContextState;

/// Per-context gate consulted before a message is matched.
pub trait ReceiveGuard: Send + Sync {
    fn name(&self) -> &str;

    /// Called once when a context is first created.
    fn init_context(&self, _state: &mut ContextState) {}

    /// Return true to suppress this turn.
    fn veto(&self, turn: &Turn<'_>, state: &mut ContextState, now: DateTime<Utc>) -> bool;

    /// Called after a turn produced output.
    fn after_send(&self, _turn: &Turn<'_>, _state: &mut ContextState, _now: DateTime<Utc>) {}
}

/// Zeroes the total candidate weight for a turn.
pub trait WeightGate: Send + Sync {
    fn name(&self) -> &str;

    /// Return true to make every candidate weightless.
    fn blocks(&self, turn: &Turn<'_>) -> bool;
}

/// Populates and validates dialogue fields from edit arguments.
pub trait ModifyHook: Send + Sync {
    fn name(&self) -> &str;

    /// Validate arguments before any target is touched.
    fn before_modify(&self, _ctx: &EditContext<'_>) -> TeachResult<()> {
        Ok(())
    }

    /// Mutate one target.
    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()>;
}

/// Decides whether the operator may edit one specific dialogue.
pub trait PermissionHook: Send + Sync {
    fn name(&self) -> &str;

    fn can_edit(&self, ctx: &EditContext<'_>, dialogue: &Dialogue) -> bool;
}

/// Contributes lines to dialogue listings and detail views.
pub trait DetailHook: Send + Sync {
    fn name(&self) -> &str;

    /// Short marker appended to a listing line, e.g. `[p=0.5]`.
    fn badge(&self, _dialogue: &Dialogue, _config: &TeachConfig) -> Option<String> {
        None
    }

    /// Lines for the detail view.
    fn detail(&self, dialogue: &Dialogue, config: &TeachConfig, output: &mut Vec<String>);
}

/// Ordered extension-point lists.
#[derive(Default)]
pub struct HookRegistry {
    guards: Vec<Arc<dyn ReceiveGuard>>,
    gates: Vec<Arc<dyn WeightGate>>,
    predicates: Vec<Box<dyn PredicateContributor>>,
    modifiers: Vec<Arc<dyn ModifyHook>>,
    permissions: Vec<Arc<dyn PermissionHook>>,
    details: Vec<Arc<dyn DetailHook>>,
}

impl HookRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in hook for `config`.
    #[must_use]
    pub fn builtin(config: &TeachConfig) -> Self {
        let mut hooks = Self::new();
        for contributor in builtin_contributors() {
            hooks.predicates.push(contributor);
        }
        for guard in crate::guard::builtin_guards(config) {
            hooks.guards.push(guard);
        }
        hooks.register_gate(Arc::new(crate::guard::IgnoredUserGate));
        for modifier in crate::edit::builtin_modifiers() {
            hooks.modifiers.push(modifier);
        }
        for permission in crate::edit::builtin_permissions() {
            hooks.permissions.push(permission);
        }
        for detail in crate::format::builtin_details() {
            hooks.details.push(detail);
        }
        hooks
    }

    pub fn register_guard(&mut self, guard: Arc<dyn ReceiveGuard>) -> &mut Self {
        self.guards.push(guard);
        self
    }

    pub fn register_gate(&mut self, gate: Arc<dyn WeightGate>) -> &mut Self {
        self.gates.push(gate);
        self
    }

    pub fn register_predicate(&mut self, contributor: Box<dyn PredicateContributor>) -> &mut Self {
        self.predicates.push(contributor);
        self
    }

    pub fn register_modifier(&mut self, modifier: Arc<dyn ModifyHook>) -> &mut Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn register_permission(&mut self, permission: Arc<dyn PermissionHook>) -> &mut Self {
        self.permissions.push(permission);
        self
    }

    pub fn register_detail(&mut self, detail: Arc<dyn DetailHook>) -> &mut Self {
        self.details.push(detail);
        self
    }

    #[must_use]
    pub fn guards(&self) -> &[Arc<dyn ReceiveGuard>] {
        &self.guards
    }

    #[must_use]
    pub fn gates(&self) -> &[Arc<dyn WeightGate>] {
        &self.gates
    }

    #[must_use]
    pub fn predicates(&self) -> &[Box<dyn PredicateContributor>] {
        &self.predicates
    }

    #[must_use]
    pub fn modifiers(&self) -> &[Arc<dyn ModifyHook>] {
        &self.modifiers
    }

    #[must_use]
    pub fn permissions(&self) -> &[Arc<dyn PermissionHook>] {
        &self.permissions
    }

    #[must_use]
    pub fn details(&self) -> &[Arc<dyn DetailHook>] {
        &self.details
    }

    /// Initialize a freshly created context through every guard.
    pub fn init_context(&self, state: &mut ContextState) {
        for guard in &self.guards {
            guard.init_context(state);
        }
    }

    /// The name of the first guard vetoing the turn.
    pub fn first_veto(
        &self,
        turn: &Turn<'_>,
        state: &mut ContextState,
        now: DateTime<Utc>,
    ) -> Option<&str> {
        self.guards
            .iter()
            .find(|guard| guard.veto(turn, state, now))
            .map(|guard| guard.name())
    }

    /// Notify every guard that the turn produced output.
    pub fn after_send(&self, turn: &Turn<'_>, state: &mut ContextState, now: DateTime<Utc>) {
        for guard in &self.guards {
            guard.after_send(turn, state, now);
        }
    }

    /// Returns true if any weight gate blocks the turn.
    #[must_use]
    pub fn weight_blocked(&self, turn: &Turn<'_>) -> bool {
        self.gates.iter().any(|gate| gate.blocks(turn))
    }

    /// Returns true if every permission hook allows editing `dialogue`.
    #[must_use]
    pub fn can_edit(&self, ctx: &EditContext<'_>, dialogue: &Dialogue) -> bool {
        self.permissions.iter().all(|hook| hook.can_edit(ctx, dialogue))
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |list: Vec<&str>| list.join(", ");
        f.debug_struct("HookRegistry")
            .field("guards", &names(self.guards.iter().map(|h| h.name()).collect()))
            .field("gates", &names(self.gates.iter().map(|h| h.name()).collect()))
            .field("predicates", &names(self.predicates.iter().map(|h| h.name()).collect()))
            .field("modifiers", &names(self.modifiers.iter().map(|h| h.name()).collect()))
            .field("permissions", &names(self.permissions.iter().map(|h| h.name()).collect()))
            .field("details", &names(self.details.iter().map(|h| h.name()).collect()))
            .finish()
    }
}
