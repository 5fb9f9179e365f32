//! Match criteria and their translation into store predicates.
//!
//! A [`DialogueTest`] describes what the caller is looking for: the receiver
//! fills one in for every message, search fills one in from the operator's
//! filters. Translation is open: each registered [`PredicateContributor`]
//! inspects the test and pushes the clauses it understands into a shared
//! [`QueryBuilder`]. Fields no contributor recognizes are simply ignored.
//!
//! The resulting [`Condition`] is backend-agnostic; [`Condition::matches`]
//! gives its reference semantics for in-process backends.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::{Regex, RegexBuilder};

use crate::dialogue::{Dialogue, DialogueFlags, DialogueId};
use crate::error::ValidationError;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<(String, bool), Regex>>> = OnceLock::new();

/// Compile a pattern through a bounded process-wide cache.
pub fn cached_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, ValidationError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    let key = (pattern.to_string(), case_insensitive);

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(&key) {
            return Ok(re.clone());
        }
    }

    let compiled = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| ValidationError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

    // A poisoned cache only costs recompilation.
    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard.entry(key).or_insert_with(|| compiled.clone());
    }
    Ok(compiled)
}

/// Ephemeral match/search criteria. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogueTest {
    /// Normalized question text, or a pattern when `regexp` is `Some(true)`.
    pub question: Option<String>,
    /// Raw text regex dialogues are matched against in receive mode.
    pub original: Option<String>,
    pub answer: Option<String>,
    /// `None`: receive mode (literal questions compare equal, regex
    /// questions must match the text). `Some(true)`: the given question
    /// and answer are patterns. `Some(false)`: literal comparison only.
    pub regexp: Option<bool>,
    /// Restrict to dialogues that can answer an appellative (`probA > 0`)
    /// or a strict (`probS > 0`) message.
    pub appellative: Option<bool>,
    /// Context the message arrived in.
    pub guild: Option<String>,
    /// Search scope: dialogues enabled (or with `reversed`, disabled) in
    /// all of these guilds, or with `partial` in any of them.
    pub guilds: Vec<String>,
    pub reversed: bool,
    pub partial: bool,
    /// Minute of day the dialogue must be active at.
    pub match_time: Option<u16>,
    /// Currently hot dialogue ids.
    pub predecessors: Vec<DialogueId>,
    /// Only dialogues without predecessors or with a hot one.
    pub stateful: bool,
    pub writer: Option<String>,
    pub frozen: Option<bool>,
    /// Exclude answers that merely redirect to another question.
    pub no_recursive: bool,
}

/// Text columns a condition may compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Question,
    Original,
    Answer,
}

impl TextField {
    fn of(self, dialogue: &Dialogue) -> &str {
        match self {
            Self::Question => &dialogue.question,
            Self::Original => &dialogue.original,
            Self::Answer => &dialogue.answer,
        }
    }
}

/// Probability columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbField {
    Strict,
    Appellative,
}

/// Backend-agnostic predicate over dialogues.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    IdIn(Vec<DialogueId>),
    /// Stored text equals `value`.
    TextEquals { field: TextField, value: String },
    /// Stored text is matched by the caller's `pattern`.
    TextMatches { field: TextField, pattern: String },
    /// Stored text is a pattern matching the caller's `text`.
    PatternMatches { field: TextField, text: String },
    FlagSet(DialogueFlags),
    FlagUnset(DialogueFlags),
    EnabledIn(String),
    GuildsCover {
        guilds: Vec<String>,
        reversed: bool,
        partial: bool,
    },
    ActiveAt(u16),
    PredecessorsEmpty,
    PredecessorsAny(Vec<DialogueId>),
    Writer(Option<String>),
    Positive(ProbField),
    IsRedirection,
}

impl Condition {
    /// Condition matching every dialogue.
    #[must_use]
    pub const fn always() -> Self {
        Self::All(Vec::new())
    }

    /// Reference evaluation.
    ///
    /// Patterns that fail to compile match nothing; callers validate
    /// operator-supplied patterns before querying.
    #[must_use]
    pub fn matches(&self, d: &Dialogue) -> bool {
        match self {
            Self::All(items) => items.iter().all(|c| c.matches(d)),
            Self::Any(items) => items.iter().any(|c| c.matches(d)),
            Self::Not(inner) => !inner.matches(d),
            Self::IdIn(ids) => ids.contains(&d.id),
            Self::TextEquals { field, value } => field.of(d) == value,
            Self::TextMatches { field, pattern } => {
                cached_regex(pattern, false).is_ok_and(|re| re.is_match(field.of(d)))
            }
            Self::PatternMatches { field, text } => {
                cached_regex(field.of(d), true).is_ok_and(|re| re.is_match(text))
            }
            Self::FlagSet(flag) => d.flag.contains(*flag),
            Self::FlagUnset(flag) => !d.flag.contains(*flag),
            Self::EnabledIn(guild) => d.is_enabled_in(guild),
            Self::GuildsCover {
                guilds,
                reversed,
                partial,
            } => {
                let hits = guilds
                    .iter()
                    .filter(|g| d.is_enabled_in(g) != *reversed)
                    .count();
                if *partial {
                    hits > 0
                } else {
                    hits == guilds.len()
                }
            }
            Self::ActiveAt(minute) => d.is_active_at(*minute),
            Self::PredecessorsEmpty => d.predecessors.is_empty(),
            Self::PredecessorsAny(ids) => d.predecessors.iter().any(|p| ids.contains(p)),
            Self::Writer(writer) => &d.writer == writer,
            Self::Positive(ProbField::Strict) => d.prob_s > 0.0,
            Self::Positive(ProbField::Appellative) => d.prob_a > 0.0,
            Self::IsRedirection => d.redirection().is_some(),
        }
    }
}

/// Accumulates clauses from contributors; all clauses must hold.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    clauses: Vec<Condition>,
}

impl QueryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause.
    pub fn push(&mut self, clause: Condition) -> &mut Self {
        self.clauses.push(clause);
        self
    }

    /// Number of clauses so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Returns true if no clause was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Conjunction of all clauses.
    #[must_use]
    pub fn build(self) -> Condition {
        match self.clauses.len() {
            1 => self.clauses.into_iter().next().unwrap_or_else(Condition::always),
            _ => Condition::All(self.clauses),
        }
    }
}

/// Translates part of a [`DialogueTest`] into clauses.
pub trait PredicateContributor: Send + Sync {
    /// Name for diagnostics.
    fn name(&self) -> &str;

    /// Push clauses for the fields this contributor understands.
    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder);
}

/// Run every contributor in order and build the final condition.
#[must_use]
pub fn translate(test: &DialogueTest, contributors: &[Box<dyn PredicateContributor>]) -> Condition {
    let mut query = QueryBuilder::new();
    for contributor in contributors {
        contributor.contribute(test, &mut query);
    }
    query.build()
}

/// Question: literal equality, stored-regex match, or search pattern.
#[derive(Debug, Default)]
pub struct QuestionPredicate;

impl PredicateContributor for QuestionPredicate {
    fn name(&self) -> &str {
        "question"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        let Some(question) = &test.question else {
            return;
        };
        let clause = match test.regexp {
            None => Condition::Any(vec![
                Condition::All(vec![
                    Condition::FlagUnset(DialogueFlags::REGEXP),
                    Condition::TextEquals {
                        field: TextField::Question,
                        value: question.clone(),
                    },
                ]),
                Condition::All(vec![
                    Condition::FlagSet(DialogueFlags::REGEXP),
                    Condition::PatternMatches {
                        field: TextField::Question,
                        text: test.original.clone().unwrap_or_else(|| question.clone()),
                    },
                ]),
            ]),
            Some(true) => Condition::TextMatches {
                field: TextField::Question,
                pattern: question.clone(),
            },
            Some(false) => Condition::TextEquals {
                field: TextField::Question,
                value: question.clone(),
            },
        };
        query.push(clause);
    }
}

/// Answer: equality or pattern, optionally excluding redirections.
#[derive(Debug, Default)]
pub struct AnswerPredicate;

impl PredicateContributor for AnswerPredicate {
    fn name(&self) -> &str {
        "answer"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        if let Some(answer) = &test.answer {
            let clause = if test.regexp == Some(true) {
                Condition::TextMatches {
                    field: TextField::Answer,
                    pattern: answer.clone(),
                }
            } else {
                Condition::TextEquals {
                    field: TextField::Answer,
                    value: answer.clone(),
                }
            };
            query.push(clause);
        }
        if test.no_recursive {
            query.push(Condition::Not(Box::new(Condition::IsRedirection)));
        }
    }
}

/// Cyclic activity window.
#[derive(Debug, Default)]
pub struct TimePredicate;

impl PredicateContributor for TimePredicate {
    fn name(&self) -> &str {
        "time"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        if let Some(minute) = test.match_time {
            query.push(Condition::ActiveAt(minute));
        }
    }
}

/// Guild inclusion/exclusion.
#[derive(Debug, Default)]
pub struct GuildPredicate;

impl PredicateContributor for GuildPredicate {
    fn name(&self) -> &str {
        "guild"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        if let Some(guild) = &test.guild {
            query.push(Condition::EnabledIn(guild.clone()));
        }
        if !test.guilds.is_empty() {
            query.push(Condition::GuildsCover {
                guilds: test.guilds.clone(),
                reversed: test.reversed,
                partial: test.partial,
            });
        }
    }
}

/// Predecessor constraints.
#[derive(Debug, Default)]
pub struct SuccessorPredicate;

impl PredicateContributor for SuccessorPredicate {
    fn name(&self) -> &str {
        "successor"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        if test.stateful {
            let mut options = vec![Condition::PredecessorsEmpty];
            if !test.predecessors.is_empty() {
                options.push(Condition::PredecessorsAny(test.predecessors.clone()));
            }
            query.push(Condition::Any(options));
        } else if !test.predecessors.is_empty() {
            query.push(Condition::PredecessorsAny(test.predecessors.clone()));
        }
    }
}

/// Writer filter.
#[derive(Debug, Default)]
pub struct WriterPredicate;

impl PredicateContributor for WriterPredicate {
    fn name(&self) -> &str {
        "writer"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        if let Some(writer) = &test.writer {
            query.push(Condition::Writer(Some(writer.clone())));
        }
    }
}

/// Strict/appellative probability and flag filters.
#[derive(Debug, Default)]
pub struct FlagPredicate;

impl PredicateContributor for FlagPredicate {
    fn name(&self) -> &str {
        "flag"
    }

    fn contribute(&self, test: &DialogueTest, query: &mut QueryBuilder) {
        match test.appellative {
            Some(true) => {
                query.push(Condition::Positive(ProbField::Appellative));
            }
            Some(false) => {
                query.push(Condition::Positive(ProbField::Strict));
            }
            None => {}
        }
        match test.frozen {
            Some(true) => {
                query.push(Condition::FlagSet(DialogueFlags::FROZEN));
            }
            Some(false) => {
                query.push(Condition::FlagUnset(DialogueFlags::FROZEN));
            }
            None => {}
        }
    }
}

/// The built-in contributor chain, in registration order.
#[must_use]
pub fn builtin_contributors() -> Vec<Box<dyn PredicateContributor>> {
    vec![
        Box::new(QuestionPredicate),
        Box::new(AnswerPredicate),
        Box::new(TimePredicate),
        Box::new(GuildPredicate),
        Box::new(SuccessorPredicate),
        Box::new(WriterPredicate),
        Box::new(FlagPredicate),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(test: &DialogueTest) -> Condition {
        translate(test, &builtin_contributors())
    }

    fn regex_dialogue(pattern: &str) -> Dialogue {
        let mut d = Dialogue::new(pattern, "a");
        d.flag.set(DialogueFlags::REGEXP, true);
        d
    }

    #[test]
    fn empty_test_matches_everything() {
        let cond = run(&DialogueTest::default());
        assert_eq!(cond, Condition::always());
        assert!(cond.matches(&Dialogue::new("q", "a")));
    }

    #[test]
    fn receive_mode_matches_literal_and_stored_regex() {
        let test = DialogueTest {
            question: Some("hello world".to_string()),
            original: Some("Hello World".to_string()),
            ..DialogueTest::default()
        };
        let cond = run(&test);
        assert!(cond.matches(&Dialogue::new("hello world", "a")));
        assert!(!cond.matches(&Dialogue::new("hello", "a")));
        assert!(cond.matches(&regex_dialogue("^hello (\\w+)$")));
        assert!(!cond.matches(&regex_dialogue("^bye")));
        // A literal dialogue whose text looks like a regex is not a pattern.
        assert!(!cond.matches(&Dialogue::new("^hello", "a")));
    }

    #[test]
    fn search_mode_uses_caller_pattern() {
        let test = DialogueTest {
            answer: Some("^x+$".to_string()),
            regexp: Some(true),
            ..DialogueTest::default()
        };
        let cond = run(&test);
        assert!(cond.matches(&Dialogue::new("q", "xxx")));
        assert!(!cond.matches(&Dialogue::new("q", "xy")));
    }

    #[test]
    fn invalid_stored_pattern_matches_nothing() {
        let test = DialogueTest {
            question: Some("(".to_string()),
            ..DialogueTest::default()
        };
        assert!(!run(&test).matches(&regex_dialogue("(")));
        assert!(cached_regex("(", false).is_err());
    }

    #[test]
    fn guild_time_and_successor_clauses() {
        let mut d = Dialogue::new("q", "a");
        d.flag.set(DialogueFlags::COMPLEMENT, false);
        d.set_guilds(vec!["g1".to_string()]);
        d.start_time = 600;
        d.end_time = 660;
        d.predecessors = vec![DialogueId(7)];

        let mut test = DialogueTest {
            guild: Some("g1".to_string()),
            match_time: Some(630),
            stateful: true,
            predecessors: vec![DialogueId(7)],
            ..DialogueTest::default()
        };
        assert!(run(&test).matches(&d));

        test.match_time = Some(700);
        assert!(!run(&test).matches(&d));

        test.match_time = Some(630);
        test.predecessors.clear();
        assert!(!run(&test).matches(&d));

        test.predecessors = vec![DialogueId(7)];
        test.guild = Some("g2".to_string());
        assert!(!run(&test).matches(&d));
    }

    #[test]
    fn guilds_cover_all_or_partial() {
        let mut d = Dialogue::new("q", "a");
        d.flag.set(DialogueFlags::COMPLEMENT, false);
        d.set_guilds(vec!["a".to_string()]);

        let mut test = DialogueTest {
            guilds: vec!["a".to_string(), "b".to_string()],
            ..DialogueTest::default()
        };
        assert!(!run(&test).matches(&d));
        test.partial = true;
        assert!(run(&test).matches(&d));
        test.partial = false;
        test.reversed = true;
        assert!(!run(&test).matches(&d));
        test.guilds = vec!["b".to_string()];
        assert!(run(&test).matches(&d));
    }

    #[test]
    fn appellative_and_redirection_filters() {
        let mut d = Dialogue::new("q", "$(dialogue other)");
        d.prob_s = 0.0;
        d.prob_a = 1.0;
        let test = DialogueTest {
            appellative: Some(false),
            ..DialogueTest::default()
        };
        assert!(!run(&test).matches(&d));
        let test = DialogueTest {
            appellative: Some(true),
            no_recursive: true,
            ..DialogueTest::default()
        };
        assert!(!run(&test).matches(&d));
    }
}
