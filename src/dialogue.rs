//! The dialogue record: a stored trigger → answer rule.
//!
//! A dialogue carries everything the receiver needs to decide whether it is
//! eligible for a message: the trigger (literal or regex), scoping guilds,
//! a daily activity window, predecessor constraints and two probabilities,
//! one for plain messages and one for messages addressed to the bot.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::observed::{Diff, Record};
use crate::time::TimeWindow;

/// Integer identifier assigned by the store on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogueId(pub u64);

impl DialogueId {
    /// Returns the raw integer.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DialogueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DialogueId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Bitset of dialogue flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogueFlags(u8);

impl DialogueFlags {
    /// Editing requires elevated authority.
    pub const FROZEN: Self = Self(1);
    /// The question is a regular expression.
    pub const REGEXP: Self = Self(1 << 1);
    /// Successor may be triggered by anyone in the context.
    pub const CONTEXT: Self = Self(1 << 2);
    /// Sub-invocations run on behalf of the writer.
    pub const SUBSTITUTE: Self = Self(1 << 3);
    /// The guild list excludes rather than includes.
    pub const COMPLEMENT: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::FROZEN, "frozen"),
        (Self::REGEXP, "regexp"),
        (Self::CONTEXT, "context"),
        (Self::SUBSTITUTE, "substitute"),
        (Self::COMPLEMENT, "complement"),
    ];

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0b1_1111)
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear `flag`.
    pub fn set(&mut self, flag: Self, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    /// Copy with `flag` set or cleared.
    #[must_use]
    pub fn with(mut self, flag: Self, on: bool) -> Self {
        self.set(flag, on);
        self
    }
}

impl BitOr for DialogueFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DialogueFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "DialogueFlags({})", names.join(" | "))
    }
}

/// A stored stimulus-response rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    /// Assigned by the store on create; zero until then.
    pub id: DialogueId,
    /// Normalized trigger, or regex source when `REGEXP` is set.
    pub question: String,
    /// Trigger exactly as authored.
    pub original: String,
    /// Answer template.
    pub answer: String,
    pub flag: DialogueFlags,
    /// Scoping context ids, sorted and deduplicated.
    pub guilds: Vec<String>,
    pub start_time: u16,
    pub end_time: u16,
    /// Sorted ids that must have matched recently.
    pub predecessors: Vec<DialogueId>,
    /// Milliseconds this dialogue stays hot for its successors; zero means
    /// the configured default.
    pub successor_timeout: u64,
    /// Author id; `None` when anonymous.
    pub writer: Option<String>,
    pub prob_s: f64,
    pub prob_a: f64,
}

impl Default for Dialogue {
    fn default() -> Self {
        Self {
            id: DialogueId::default(),
            question: String::new(),
            original: String::new(),
            answer: String::new(),
            flag: DialogueFlags::COMPLEMENT,
            guilds: Vec::new(),
            start_time: 0,
            end_time: 0,
            predecessors: Vec::new(),
            successor_timeout: 0,
            writer: None,
            prob_s: 1.0,
            prob_a: 0.0,
        }
    }
}

impl Dialogue {
    /// Creates an unscoped, always-on dialogue with `probS = 1`.
    ///
    /// Unscoped means an empty guild list with the complement flag, i.e.
    /// excluded from no guild.
    #[must_use]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            original: question.clone(),
            question,
            answer: answer.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_regexp(&self) -> bool {
        self.flag.contains(DialogueFlags::REGEXP)
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.flag.contains(DialogueFlags::FROZEN)
    }

    /// The daily activity window.
    #[must_use]
    pub const fn time_window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// Returns true if the dialogue is active at `minute` of day.
    #[must_use]
    pub const fn is_active_at(&self, minute: u16) -> bool {
        self.time_window().contains(minute)
    }

    /// Returns true if the dialogue may fire in `guild`.
    ///
    /// The guild list includes, or with `COMPLEMENT` excludes. An empty
    /// list without the complement flag disables the dialogue everywhere,
    /// with it enables the dialogue everywhere.
    #[must_use]
    pub fn is_enabled_in(&self, guild: &str) -> bool {
        let listed = self.guilds.binary_search_by(|g| g.as_str().cmp(guild)).is_ok();
        self.flag.contains(DialogueFlags::COMPLEMENT) ^ listed
    }

    /// Probability for a strict or an appellative match.
    #[must_use]
    pub fn probability(&self, appellative: bool) -> f64 {
        if appellative {
            self.prob_a
        } else {
            self.prob_s
        }
    }

    /// Replace the guild list, keeping it sorted and deduplicated.
    pub fn set_guilds(&mut self, guilds: impl IntoIterator<Item = String>) {
        self.guilds = normalize_guilds(guilds);
    }

    /// The question targeted when the whole answer is a single
    /// `$(dialogue <question>)` invocation.
    #[must_use]
    pub fn redirection(&self) -> Option<&str> {
        let inner = self.answer.trim().strip_prefix("$(")?.strip_suffix(')')?;
        if inner.contains("$(") {
            return None;
        }
        let rest = inner.trim_start().strip_prefix("dialogue")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let target = rest.trim();
        (!target.is_empty()).then_some(target)
    }
}

/// Sort and deduplicate a guild list.
#[must_use]
pub fn normalize_guilds(guilds: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = guilds.into_iter().filter(|g| !g.is_empty()).collect();
    out.sort();
    out.dedup();
    out
}

/// Sort and deduplicate a list of dialogue ids.
#[must_use]
pub fn normalize_ids(ids: impl IntoIterator<Item = DialogueId>) -> Vec<DialogueId> {
    let mut out: Vec<DialogueId> = ids.into_iter().collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Tracked fields of a [`Dialogue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DialogueField {
    Question,
    Original,
    Answer,
    Flag,
    Guilds,
    StartTime,
    EndTime,
    Predecessors,
    SuccessorTimeout,
    Writer,
    ProbS,
    ProbA,
}

impl DialogueField {
    /// Persisted column name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Original => "original",
            Self::Answer => "answer",
            Self::Flag => "flag",
            Self::Guilds => "guilds",
            Self::StartTime => "startTime",
            Self::EndTime => "endTime",
            Self::Predecessors => "predecessors",
            Self::SuccessorTimeout => "successorTimeout",
            Self::Writer => "writer",
            Self::ProbS => "probS",
            Self::ProbA => "probA",
        }
    }
}

impl fmt::Display for DialogueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value held by one [`DialogueField`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flags(DialogueFlags),
    Guilds(Vec<String>),
    Minute(u16),
    Ids(Vec<DialogueId>),
    Millis(u64),
    Writer(Option<String>),
    Probability(f64),
}

/// Field-level changes to a dialogue.
pub type DialogueDiff = Diff<Dialogue>;

impl Record for Dialogue {
    type Field = DialogueField;
    type Value = FieldValue;

    fn field(&self, field: DialogueField) -> FieldValue {
        match field {
            DialogueField::Question => FieldValue::Text(self.question.clone()),
            DialogueField::Original => FieldValue::Text(self.original.clone()),
            DialogueField::Answer => FieldValue::Text(self.answer.clone()),
            DialogueField::Flag => FieldValue::Flags(self.flag),
            DialogueField::Guilds => FieldValue::Guilds(self.guilds.clone()),
            DialogueField::StartTime => FieldValue::Minute(self.start_time),
            DialogueField::EndTime => FieldValue::Minute(self.end_time),
            DialogueField::Predecessors => FieldValue::Ids(self.predecessors.clone()),
            DialogueField::SuccessorTimeout => FieldValue::Millis(self.successor_timeout),
            DialogueField::Writer => FieldValue::Writer(self.writer.clone()),
            DialogueField::ProbS => FieldValue::Probability(self.prob_s),
            DialogueField::ProbA => FieldValue::Probability(self.prob_a),
        }
    }

    fn apply(&mut self, field: DialogueField, value: FieldValue) -> Result<(), ValidationError> {
        match (field, value) {
            (DialogueField::Question, FieldValue::Text(v)) => self.question = v,
            (DialogueField::Original, FieldValue::Text(v)) => self.original = v,
            (DialogueField::Answer, FieldValue::Text(v)) => self.answer = v,
            (DialogueField::Flag, FieldValue::Flags(v)) => self.flag = v,
            (DialogueField::Guilds, FieldValue::Guilds(v)) => self.guilds = normalize_guilds(v),
            (DialogueField::StartTime, FieldValue::Minute(v)) => self.start_time = v,
            (DialogueField::EndTime, FieldValue::Minute(v)) => self.end_time = v,
            (DialogueField::Predecessors, FieldValue::Ids(v)) => self.predecessors = normalize_ids(v),
            (DialogueField::SuccessorTimeout, FieldValue::Millis(v)) => self.successor_timeout = v,
            (DialogueField::Writer, FieldValue::Writer(v)) => self.writer = v,
            (DialogueField::ProbS, FieldValue::Probability(v)) => self.prob_s = v,
            (DialogueField::ProbA, FieldValue::Probability(v)) => self.prob_a = v,
            (field, _) => {
                return Err(ValidationError::FieldTypeMismatch {
                    field: field.name().to_string(),
                })
            }
        }
        Ok(())
    }
}
