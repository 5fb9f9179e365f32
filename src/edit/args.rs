//! Parsed edit command arguments.
//!
//! The command-line parser lives with the host bot; the engine consumes
//! only these structures.

use crate::dialogue::DialogueId;

/// Writer override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterOption {
    /// Drop authorship.
    Anonymous,
    /// Attribute to another user id.
    User(String),
}

/// Guild scope changes.
///
/// `reset` first makes the dialogue enabled everywhere (`Some(true)`) or
/// nowhere (`Some(false)`); `enable` and `disable` then adjust single
/// guilds relative to whatever scope results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildScope {
    pub reset: Option<bool>,
    pub enable: Vec<String>,
    pub disable: Vec<String>,
}

impl GuildScope {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reset.is_none() && self.enable.is_empty() && self.disable.is_empty()
    }
}

/// Search-only filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Treat question and answer as patterns.
    pub regexp: bool,
    /// Collapse identical complementary values.
    pub auto_merge: bool,
    /// Expand answers that redirect to another question.
    pub recursive: bool,
    /// One-based page.
    pub page: usize,
    /// Restrict to dialogues enabled (or with `reversed`, disabled) here.
    pub guilds: Vec<String>,
    pub reversed: bool,
    pub partial: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            regexp: false,
            auto_merge: true,
            recursive: true,
            page: 1,
            guilds: Vec::new(),
            reversed: false,
            partial: false,
        }
    }
}

/// Which operation a command runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    /// Create, update or show details, inferred from the arguments.
    #[default]
    Edit,
    Remove,
    Revert,
    Review,
    Search,
}

/// Field modifications and switches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeachOptions {
    /// `Some(true)` stores the question as a regular expression.
    pub regexp: Option<bool>,
    pub prob_s: Option<f64>,
    pub prob_a: Option<f64>,
    pub scope: GuildScope,
    /// Minute of day.
    pub start_time: Option<u16>,
    pub end_time: Option<u16>,
    pub writer: Option<WriterOption>,
    pub set_predecessors: Option<Vec<DialogueId>>,
    pub add_predecessors: Vec<DialogueId>,
    pub remove_predecessors: Vec<DialogueId>,
    /// Milliseconds; zero restores the configured default.
    pub successor_timeout: Option<u64>,
    pub frozen: Option<bool>,
    pub context: Option<bool>,
    pub substitute: Option<bool>,
    pub search: SearchOptions,
}

/// A parsed edit command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeachArgs {
    pub action: Action,
    /// `#id` targets.
    pub targets: Vec<DialogueId>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub options: TeachOptions,
}

impl TeachArgs {
    /// A create command for `question` → `answer`.
    #[must_use]
    pub fn create(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: Some(question.into()),
            answer: Some(answer.into()),
            ..Self::default()
        }
    }

    /// An edit command over existing targets.
    #[must_use]
    pub fn targets(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            targets: ids.into_iter().map(DialogueId).collect(),
            ..Self::default()
        }
    }

    /// A search command.
    #[must_use]
    pub fn search(question: Option<&str>, answer: Option<&str>) -> Self {
        Self {
            action: Action::Search,
            question: question.map(str::to_string),
            answer: answer.map(str::to_string),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: TeachOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns true if any field change was requested besides the
    /// question and answer.
    #[must_use]
    pub fn has_option_changes(&self) -> bool {
        let o = &self.options;
        o.regexp.is_some()
            || o.prob_s.is_some()
            || o.prob_a.is_some()
            || !o.scope.is_empty()
            || o.start_time.is_some()
            || o.end_time.is_some()
            || o.writer.is_some()
            || o.set_predecessors.is_some()
            || !o.add_predecessors.is_empty()
            || !o.remove_predecessors.is_empty()
            || o.successor_timeout.is_some()
            || o.frozen.is_some()
            || o.context.is_some()
            || o.substitute.is_some()
    }

    /// Returns true if any field change was requested at all.
    #[must_use]
    pub fn has_modifications(&self) -> bool {
        self.question.is_some() || self.answer.is_some() || self.has_option_changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modification_detection() {
        assert!(!TeachArgs::targets([1]).has_modifications());
        assert!(TeachArgs::create("q", "a").has_modifications());
        assert!(!TeachArgs::create("q", "a").has_option_changes());

        let mut args = TeachArgs::targets([1]);
        args.options.scope.enable.push("g".to_string());
        assert!(args.has_option_changes());

        let args = TeachArgs::search(Some("q"), None);
        assert_eq!(args.action, Action::Search);
        assert!(args.options.search.auto_merge);
    }
}
