//! Matching and selection.
//!
//! A turn runs these steps strictly in order:
//!
//! 1. normalize the text and resolve nickname activation
//! 2. consult the receive guards (top-level turns only)
//! 3. translate the match criteria and query the store
//! 4. give successors of recently matched dialogues precedence
//! 5. weight the candidates and draw one
//! 6. render the answer, sending text and running sub-invocations
//! 7. after output, notify the guards and mark the dialogue hot
//!
//! A `$(dialogue <question>)` sub-invocation re-enters step 1 with the same
//! sender and context one level deeper; chains deeper than
//! `max_redirections` are dropped.

mod normalize;
mod pick;
mod render;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::TeachConfig;
use crate::dialogue::{Dialogue, DialogueFlags, DialogueId};
use crate::error::{ExecutionError, TeachError, TeachResult};
use crate::hooks::HookRegistry;
use crate::query::{cached_regex, translate, DialogueTest};
use crate::session::{ContextState, Message, Responder, SessionRegistry};
use crate::storage::DialogueStore;
use crate::time::{minute_of_day, Clock};

pub use normalize::{normalize, normalize_question, Normalized};
pub use pick::pick_index;
pub use render::{expand, tokenize, MacroScope, Segment};

/// A dialogue considered for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub dialogue: Dialogue,
    pub weight: f64,
    /// Capture groups 1..=9 for regex dialogues.
    pub capture: Option<Vec<Option<String>>>,
}

/// State of one trigger attempt.
#[derive(Debug, Clone)]
pub struct Turn<'a> {
    pub message: &'a Message,
    pub normalized: Normalized,
    /// Appellative after activation marks are applied.
    pub appellative: bool,
    /// Zero for the message itself, one more per redirection.
    pub depth: usize,
    pub test: DialogueTest,
    pub candidates: Vec<Candidate>,
    pub dialogue: Option<Dialogue>,
}

impl<'a> Turn<'a> {
    #[must_use]
    pub fn new(message: &'a Message, normalized: Normalized, depth: usize) -> Self {
        Self {
            message,
            appellative: normalized.appellative,
            normalized,
            depth,
            test: DialogueTest::default(),
            candidates: Vec::new(),
            dialogue: None,
        }
    }

    /// Returns true for a turn reached through a redirection.
    #[must_use]
    pub const fn is_redirected(&self) -> bool {
        self.depth > 0
    }
}

/// A recently matched dialogue its successors may follow.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HotDialogue {
    id: DialogueId,
    user: String,
    expires: DateTime<Utc>,
}

/// Per-context successor hot list.
#[derive(Debug, Clone, Default)]
pub struct SuccessorState {
    hot: Vec<HotDialogue>,
}

impl SuccessorState {
    fn prune(&mut self, now: DateTime<Utc>) {
        self.hot.retain(|entry| entry.expires > now);
    }

    fn mark(&mut self, id: DialogueId, user: &str, expires: DateTime<Utc>) {
        self.hot.retain(|entry| !(entry.id == id && entry.user == user));
        self.hot.push(HotDialogue {
            id,
            user: user.to_string(),
            expires,
        });
    }

    /// Ids currently hot for anybody.
    #[must_use]
    pub fn hot_ids(&self) -> Vec<DialogueId> {
        let mut ids: Vec<DialogueId> = self.hot.iter().map(|entry| entry.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn follows(&self, dialogue: &Dialogue, user: &str) -> bool {
        let any_user = dialogue.flag.contains(DialogueFlags::CONTEXT);
        self.hot.iter().any(|entry| {
            dialogue.predecessors.contains(&entry.id) && (any_user || entry.user == user)
        })
    }
}

/// Per-context nickname activations, keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct ActivationState {
    marks: HashMap<String, DateTime<Utc>>,
}

impl ActivationState {
    fn prune(&mut self, now: DateTime<Utc>) {
        self.marks.retain(|_, expires| *expires > now);
    }

    fn mark(&mut self, user: &str, expires: DateTime<Utc>, now: DateTime<Utc>) {
        self.prune(now);
        self.marks.insert(user.to_string(), expires);
    }

    /// Consume a live mark for `user`.
    fn take(&mut self, user: &str, now: DateTime<Utc>) -> bool {
        self.prune(now);
        self.marks.remove(user).is_some()
    }

    /// Number of users with an unexpired or not yet pruned mark.
    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// Borrowed engine parts a turn runs against.
pub struct Receiver<'e> {
    pub config: &'e TeachConfig,
    pub store: &'e dyn DialogueStore,
    pub hooks: &'e HookRegistry,
    pub sessions: &'e SessionRegistry,
    pub clock: &'e dyn Clock,
    pub rng: &'e Mutex<StdRng>,
}

/// Whether a turn produced output, and what it picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Outcome {
    picked: Option<DialogueId>,
    output: bool,
}

impl Receiver<'_> {
    /// Trigger dialogues for an inbound message.
    ///
    /// Returns the id of the dialogue that answered, or `None` when
    /// nothing matched or a guard suppressed the turn.
    pub fn receive(
        &self,
        message: &Message,
        responder: &mut dyn Responder,
    ) -> TeachResult<Option<DialogueId>> {
        let normalized = normalize(&message.content, self.config);
        Ok(self.trigger(message, normalized, 0, false, responder)?.picked)
    }

    fn with_context<R>(&self, id: &str, f: impl FnOnce(&mut ContextState) -> R) -> TeachResult<R> {
        self.sessions
            .with_context(id, |state| self.hooks.init_context(state), f)
    }

    fn trigger(
        &self,
        message: &Message,
        normalized: Normalized,
        depth: usize,
        inherited_appellative: bool,
        responder: &mut dyn Responder,
    ) -> TeachResult<Outcome> {
        let now = self.clock.now();
        let context_id = message.context_id.as_str();
        let user_id = message.user.id.as_str();
        let mut turn = Turn::new(message, normalized, depth);

        if depth == 0 {
            let activation_timeout = millis(self.config.activation_timeout_ms);
            let (activated, vetoed_by, hot) = self.with_context(context_id, |state| {
                let activations = state.extensions.get_or_insert_with(ActivationState::default);
                if turn.normalized.activated {
                    activations.mark(user_id, now + activation_timeout, now);
                    return (true, None, Vec::new());
                }
                if activations.take(user_id, now) {
                    turn.appellative = true;
                }
                let vetoed_by = self
                    .hooks
                    .first_veto(&turn, state, now)
                    .map(str::to_string);
                let successors = state.extensions.get_or_insert_with(SuccessorState::default);
                successors.prune(now);
                (false, vetoed_by, successors.hot_ids())
            })?;
            if activated {
                debug!(context = context_id, user = user_id, "nickname activation");
                return Ok(Outcome::default());
            }
            if let Some(guard) = vetoed_by {
                debug!(context = context_id, guard = %guard, "receive vetoed");
                return Ok(Outcome::default());
            }
            turn.test = self.criteria(&turn, now, hot);
        } else {
            turn.appellative = inherited_appellative;
            let hot = self.with_context(context_id, |state| {
                let successors = state.extensions.get_or_insert_with(SuccessorState::default);
                successors.prune(now);
                successors.hot_ids()
            })?;
            turn.test = self.criteria(&turn, now, hot);
        }

        if turn.normalized.question.is_empty() {
            return Ok(Outcome::default());
        }

        let condition = translate(&turn.test, self.hooks.predicates());
        let found = self.store.find(&condition).inspect_err(|e| {
            warn!(context = context_id, error = %e, "dialogue lookup failed");
        })?;
        let found = self.with_context(context_id, |state| {
            let successors = state.extensions.get_or_insert_with(SuccessorState::default);
            prefer_successors(found, successors, user_id)
        })?;

        let blocked = self.hooks.weight_blocked(&turn);
        turn.candidates = found
            .into_iter()
            .map(|dialogue| Candidate {
                weight: if blocked {
                    0.0
                } else {
                    dialogue.probability(turn.appellative)
                },
                capture: None,
                dialogue,
            })
            .collect();

        let weights: Vec<f64> = turn.candidates.iter().map(|c| c.weight).collect();
        let draw: f64 = self
            .rng
            .lock()
            .map_err(|_| TeachError::internal("random source lock poisoned"))?
            .gen();
        let Some(index) = pick_index(&weights, draw) else {
            debug!(
                context = context_id,
                candidates = turn.candidates.len(),
                "no dialogue picked"
            );
            return Ok(Outcome::default());
        };

        let candidate = &mut turn.candidates[index];
        if candidate.dialogue.is_regexp() {
            candidate.capture = capture_groups(&candidate.dialogue.question, &turn.normalized.original);
        }
        let dialogue = candidate.dialogue.clone();
        let capture = candidate.capture.clone();
        debug!(
            context = context_id,
            dialogue = %dialogue.id,
            depth,
            "dialogue triggered"
        );

        let output = self.render(&turn, &dialogue, capture.as_deref(), responder)?;
        turn.dialogue = Some(dialogue);

        if output {
            self.after_send(&turn, now)?;
        }
        Ok(Outcome {
            picked: turn.dialogue.as_ref().map(|d| d.id),
            output,
        })
    }

    fn criteria(&self, turn: &Turn<'_>, now: DateTime<Utc>, hot: Vec<DialogueId>) -> DialogueTest {
        DialogueTest {
            question: Some(turn.normalized.question.clone()),
            original: Some(turn.normalized.original.clone()),
            appellative: Some(turn.appellative),
            guild: Some(turn.message.context_id.clone()),
            match_time: Some(minute_of_day(now, self.config.utc_offset_minutes)),
            predecessors: hot,
            stateful: true,
            ..DialogueTest::default()
        }
    }

    /// Execute the answer. Returns true if anything was sent or run.
    fn render(
        &self,
        turn: &Turn<'_>,
        dialogue: &Dialogue,
        capture: Option<&[Option<String>]>,
        responder: &mut dyn Responder,
    ) -> TeachResult<bool> {
        let substitute = dialogue.flag.contains(DialogueFlags::SUBSTITUTE);
        let writer = dialogue.writer.as_deref().filter(|_| substitute);
        let scope = MacroScope {
            mention_all: responder.mention_all(),
            mention_sender: responder.mention(&turn.message.user.id),
            mention_self: responder.mention_self(),
            sender_name: writer.unwrap_or(&turn.message.user.name).to_string(),
            raw: &turn.normalized.raw,
            captures: capture,
        };
        let executor = writer.unwrap_or(&turn.message.user.id);

        let mut output = false;
        let mut buffer = String::new();
        for segment in tokenize(&dialogue.answer, &scope) {
            match segment {
                Segment::Text(text) => buffer.push_str(&text),
                Segment::Flush => output |= flush(&mut buffer, responder)?,
                Segment::Invoke(command) => {
                    output |= flush(&mut buffer, responder)?;
                    output |= self.invoke(turn, &command, executor, responder)?;
                }
            }
        }
        output |= flush(&mut buffer, responder)?;
        Ok(output)
    }

    fn invoke(
        &self,
        turn: &Turn<'_>,
        command: &str,
        executor: &str,
        responder: &mut dyn Responder,
    ) -> TeachResult<bool> {
        let Some(question) = redirect_target(command) else {
            responder.execute(command, executor).map_err(|e| {
                warn!(command, executor, error = %e, "sub-invocation failed");
                ExecutionError::Invocation {
                    command: command.to_string(),
                    reason: e.to_string(),
                }
            })?;
            return Ok(true);
        };
        let depth = turn.depth + 1;
        if depth > self.config.max_redirections {
            debug!(
                context = %turn.message.context_id,
                depth,
                "redirection limit reached"
            );
            return Ok(false);
        }
        let normalized = Normalized {
            question: normalize_question(question, self.config),
            original: question.to_string(),
            raw: question.to_string(),
            appellative: turn.appellative,
            activated: false,
        };
        let outcome = self.trigger(turn.message, normalized, depth, turn.appellative, responder)?;
        Ok(outcome.output)
    }

    fn after_send(&self, turn: &Turn<'_>, now: DateTime<Utc>) -> TeachResult<()> {
        let Some(dialogue) = &turn.dialogue else {
            return Ok(());
        };
        let timeout = if dialogue.successor_timeout == 0 {
            self.config.successor_timeout_ms
        } else {
            dialogue.successor_timeout
        };
        self.with_context(&turn.message.context_id, |state| {
            if !turn.is_redirected() {
                self.hooks.after_send(turn, state, now);
            }
            state
                .extensions
                .get_or_insert_with(SuccessorState::default)
                .mark(dialogue.id, &turn.message.user.id, now + millis(timeout));
        })
    }
}

/// Drop ineligible successors; if any successor remains, drop the rest.
fn prefer_successors(found: Vec<Dialogue>, hot: &SuccessorState, user: &str) -> Vec<Dialogue> {
    let eligible: Vec<Dialogue> = found
        .into_iter()
        .filter(|d| d.predecessors.is_empty() || hot.follows(d, user))
        .collect();
    if eligible.iter().any(|d| !d.predecessors.is_empty()) {
        eligible
            .into_iter()
            .filter(|d| !d.predecessors.is_empty())
            .collect()
    } else {
        eligible
    }
}

fn capture_groups(pattern: &str, text: &str) -> Option<Vec<Option<String>>> {
    let regex = cached_regex(pattern, true).ok()?;
    let captures = regex.captures(text)?;
    Some(
        (1..=9)
            .map(|i| captures.get(i).map(|m| m.as_str().to_string()))
            .collect(),
    )
}

/// The question of a `dialogue <question>` command.
fn redirect_target(command: &str) -> Option<&str> {
    let rest = command.strip_prefix("dialogue")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let question = rest.trim();
    (!question.is_empty()).then_some(question)
}

fn flush(buffer: &mut String, responder: &mut dyn Responder) -> TeachResult<bool> {
    if buffer.is_empty() {
        return Ok(false);
    }
    responder.send(buffer)?;
    buffer.clear();
    Ok(true)
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
