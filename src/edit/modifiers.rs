//! Built-in modify and permission hooks.

use std::sync::Arc;

use crate::dialogue::{Dialogue, DialogueField, DialogueFlags, FieldValue};
use crate::edit::args::WriterOption;
use crate::edit::EditContext;
use crate::error::{TeachError, TeachResult, ValidationError};
use crate::hooks::{ModifyHook, PermissionHook};
use crate::observed::Observed;
use crate::query::cached_regex;
use crate::receiver::normalize_question;
use crate::time::check_minute;

/// Question, original text, regexp flag and answer.
#[derive(Debug, Default)]
pub struct QuestionAnswerHook;

impl QuestionAnswerHook {
    fn stored_question(raw: &str, regexp: bool, ctx: &EditContext<'_>) -> TeachResult<String> {
        if regexp {
            let pattern = raw.trim();
            cached_regex(pattern, true)?;
            if pattern.is_empty() {
                return Err(ValidationError::EmptyQuestion.into());
            }
            return Ok(pattern.to_string());
        }
        let question = normalize_question(raw, ctx.config);
        if question.is_empty() {
            return Err(ValidationError::EmptyQuestion.into());
        }
        Ok(question)
    }
}

impl ModifyHook for QuestionAnswerHook {
    fn name(&self) -> &str {
        "question-answer"
    }

    fn before_modify(&self, ctx: &EditContext<'_>) -> TeachResult<()> {
        if let Some(question) = &ctx.args.question {
            match ctx.args.options.regexp {
                Some(regexp) => {
                    Self::stored_question(question, regexp, ctx)?;
                }
                None if ctx.creating => {
                    Self::stored_question(question, false, ctx)?;
                }
                // Existing targets may be regex dialogues; checked per target.
                None => {}
            }
        }
        if let Some(answer) = &ctx.args.answer {
            if answer.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "answer".to_string(),
                }
                .into());
            }
            let limit = ctx.config.max_answer_length;
            if limit > 0 && answer.chars().count() > limit {
                return Err(ValidationError::FieldTooLong {
                    field: "answer".to_string(),
                    max_length: limit,
                }
                .into());
            }
        }
        Ok(())
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        let regexp = ctx.args.options.regexp.unwrap_or_else(|| target.is_regexp());
        let raw = match &ctx.args.question {
            Some(question) => Some(question.trim().to_string()),
            // Toggling the flag alone re-derives the question from the original.
            None if ctx.args.options.regexp.is_some() => Some(target.original.clone()),
            None => None,
        };
        if let Some(raw) = raw {
            let question = Self::stored_question(&raw, regexp, ctx)?;
            target.set(DialogueField::Original, FieldValue::Text(raw))?;
            target.set(DialogueField::Question, FieldValue::Text(question))?;
            target.update(DialogueField::Flag, |value| {
                if let FieldValue::Flags(flags) = value {
                    flags.set(DialogueFlags::REGEXP, regexp);
                }
            })?;
        }
        if let Some(answer) = &ctx.args.answer {
            target.set(DialogueField::Answer, FieldValue::Text(answer.clone()))?;
        }
        Ok(())
    }
}

/// Strict and appellative probabilities.
#[derive(Debug, Default)]
pub struct ProbabilityHook;

impl ModifyHook for ProbabilityHook {
    fn name(&self) -> &str {
        "probability"
    }

    fn before_modify(&self, ctx: &EditContext<'_>) -> TeachResult<()> {
        let options = &ctx.args.options;
        for value in [options.prob_s, options.prob_a].into_iter().flatten() {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::ProbabilityOutOfRange { value }.into());
            }
        }
        Ok(())
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        if let Some(value) = ctx.args.options.prob_s {
            target.set(DialogueField::ProbS, FieldValue::Probability(value))?;
        }
        if let Some(value) = ctx.args.options.prob_a {
            target.set(DialogueField::ProbA, FieldValue::Probability(value))?;
        }
        Ok(())
    }
}

/// Guild inclusion and exclusion.
#[derive(Debug, Default)]
pub struct GuildHook;

impl ModifyHook for GuildHook {
    fn name(&self) -> &str {
        "guild"
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        let scope = &ctx.args.options.scope;
        if scope.is_empty() {
            return Ok(());
        }
        let mut complement = target.flag.contains(DialogueFlags::COMPLEMENT);
        let mut guilds = target.guilds.clone();
        if let Some(everywhere) = scope.reset {
            complement = everywhere;
            guilds.clear();
        }
        // With the complement flag the list names excluded guilds.
        let (add, remove) = if complement {
            (&scope.disable, &scope.enable)
        } else {
            (&scope.enable, &scope.disable)
        };
        guilds.retain(|g| !remove.contains(g));
        guilds.extend(add.iter().cloned());

        target.update(DialogueField::Flag, |value| {
            if let FieldValue::Flags(flags) = value {
                flags.set(DialogueFlags::COMPLEMENT, complement);
            }
        })?;
        target.set(DialogueField::Guilds, FieldValue::Guilds(guilds))?;
        Ok(())
    }
}

/// Daily activity window.
#[derive(Debug, Default)]
pub struct TimeHook;

impl ModifyHook for TimeHook {
    fn name(&self) -> &str {
        "time"
    }

    fn before_modify(&self, ctx: &EditContext<'_>) -> TeachResult<()> {
        let options = &ctx.args.options;
        for minute in [options.start_time, options.end_time].into_iter().flatten() {
            check_minute(minute)?;
        }
        Ok(())
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        if let Some(minute) = ctx.args.options.start_time {
            target.set(DialogueField::StartTime, FieldValue::Minute(minute))?;
        }
        if let Some(minute) = ctx.args.options.end_time {
            target.set(DialogueField::EndTime, FieldValue::Minute(minute))?;
        }
        Ok(())
    }
}

/// Authorship.
#[derive(Debug, Default)]
pub struct WriterHook;

impl ModifyHook for WriterHook {
    fn name(&self) -> &str {
        "writer"
    }

    fn before_modify(&self, ctx: &EditContext<'_>) -> TeachResult<()> {
        if let Some(WriterOption::User(id)) = &ctx.args.options.writer {
            if *id != ctx.operator.id && ctx.operator.authority < ctx.config.authority.writer {
                return Err(TeachError::permission("你的权限不足以设置他人为作者。"));
            }
        }
        Ok(())
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        let writer = match &ctx.args.options.writer {
            Some(WriterOption::Anonymous) => None,
            Some(WriterOption::User(id)) => Some(id.clone()),
            None if ctx.creating => Some(ctx.operator.id.clone()),
            None => return Ok(()),
        };
        target.set(DialogueField::Writer, FieldValue::Writer(writer))?;
        Ok(())
    }
}

/// Predecessors and successor timeout.
#[derive(Debug, Default)]
pub struct SuccessorHook;

impl ModifyHook for SuccessorHook {
    fn name(&self) -> &str {
        "successor"
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        let options = &ctx.args.options;
        let id = target.id;
        if options.set_predecessors.is_some()
            || !options.add_predecessors.is_empty()
            || !options.remove_predecessors.is_empty()
        {
            let mut predecessors = options
                .set_predecessors
                .clone()
                .unwrap_or_else(|| target.predecessors.clone());
            predecessors.extend(options.add_predecessors.iter().copied());
            predecessors.retain(|p| !options.remove_predecessors.contains(p));
            if !ctx.creating && predecessors.contains(&id) {
                return Err(ValidationError::SelfPredecessor { id }.into());
            }
            target.set(DialogueField::Predecessors, FieldValue::Ids(predecessors))?;
        }
        if let Some(timeout) = options.successor_timeout {
            target.set(DialogueField::SuccessorTimeout, FieldValue::Millis(timeout))?;
        }
        Ok(())
    }
}

/// Frozen, context and substitute switches.
#[derive(Debug, Default)]
pub struct FlagHook;

impl ModifyHook for FlagHook {
    fn name(&self) -> &str {
        "flag"
    }

    fn before_modify(&self, ctx: &EditContext<'_>) -> TeachResult<()> {
        if ctx.args.options.frozen.is_some() && ctx.operator.authority < ctx.config.authority.frozen {
            return Err(TeachError::permission("你的权限不足以锁定或解锁问答。"));
        }
        Ok(())
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        let options = &ctx.args.options;
        let switches = [
            (DialogueFlags::FROZEN, options.frozen),
            (DialogueFlags::CONTEXT, options.context),
            (DialogueFlags::SUBSTITUTE, options.substitute),
        ];
        if switches.iter().all(|(_, value)| value.is_none()) {
            return Ok(());
        }
        target.update(DialogueField::Flag, |value| {
            if let FieldValue::Flags(flags) = value {
                for (flag, on) in switches {
                    if let Some(on) = on {
                        flags.set(flag, on);
                    }
                }
            }
        })?;
        Ok(())
    }
}

/// Frozen dialogues need elevated authority.
#[derive(Debug, Default)]
pub struct FrozenPermission;

impl PermissionHook for FrozenPermission {
    fn name(&self) -> &str {
        "frozen"
    }

    fn can_edit(&self, ctx: &EditContext<'_>, dialogue: &Dialogue) -> bool {
        !dialogue.is_frozen() || ctx.operator.authority >= ctx.config.authority.frozen
    }
}

/// Dialogues written by someone else need elevated authority.
#[derive(Debug, Default)]
pub struct WriterPermission;

impl PermissionHook for WriterPermission {
    fn name(&self) -> &str {
        "writer"
    }

    fn can_edit(&self, ctx: &EditContext<'_>, dialogue: &Dialogue) -> bool {
        match &dialogue.writer {
            Some(writer) if *writer != ctx.operator.id => {
                ctx.operator.authority >= ctx.config.authority.writer
            }
            _ => true,
        }
    }
}

/// The built-in modify hooks, in dispatch order.
#[must_use]
pub fn builtin_modifiers() -> Vec<Arc<dyn ModifyHook>> {
    vec![
        Arc::new(QuestionAnswerHook),
        Arc::new(ProbabilityHook),
        Arc::new(GuildHook),
        Arc::new(TimeHook),
        Arc::new(WriterHook),
        Arc::new(SuccessorHook),
        Arc::new(FlagHook),
    ]
}

/// The built-in permission hooks.
#[must_use]
pub fn builtin_permissions() -> Vec<Arc<dyn PermissionHook>> {
    vec![Arc::new(FrozenPermission), Arc::new(WriterPermission)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TeachConfig;
    use crate::dialogue::DialogueId;
    use crate::edit::args::{GuildScope, TeachArgs};
    use crate::session::User;
    use chrono::Utc;

    fn ctx<'a>(args: &'a TeachArgs, operator: &'a User, config: &'a TeachConfig) -> EditContext<'a> {
        EditContext {
            args,
            operator,
            config,
            now: Utc::now(),
            creating: false,
        }
    }

    fn apply(args: &TeachArgs, operator: &User, dialogue: Dialogue) -> TeachResult<Observed<Dialogue>> {
        let config = TeachConfig::default();
        let ctx = ctx(args, operator, &config);
        let mut target = Observed::new(dialogue);
        for hook in builtin_modifiers() {
            hook.before_modify(&ctx)?;
        }
        for hook in builtin_modifiers() {
            hook.modify(&ctx, &mut target)?;
        }
        Ok(target)
    }

    fn admin() -> User {
        User::new("admin", "Admin").with_authority(4)
    }

    #[test]
    fn question_is_normalized_unless_regexp() {
        let mut args = TeachArgs::targets([1]);
        args.question = Some("  Hello   There! ".to_string());
        let target = apply(&args, &admin(), Dialogue::new("q", "a")).unwrap();
        assert_eq!(target.question, "hello there");
        assert_eq!(target.original, "Hello   There!");

        args.options.regexp = Some(true);
        args.question = Some("^Hello (\\w+)$".to_string());
        let target = apply(&args, &admin(), Dialogue::new("q", "a")).unwrap();
        assert_eq!(target.question, "^Hello (\\w+)$");
        assert!(target.is_regexp());
    }

    #[test]
    fn invalid_regex_and_probability_are_rejected() {
        let mut args = TeachArgs::targets([1]);
        args.question = Some("(".to_string());
        args.options.regexp = Some(true);
        let err = apply(&args, &admin(), Dialogue::new("q", "a")).unwrap_err();
        assert!(matches!(err, TeachError::Validation(ValidationError::InvalidRegex { .. })));

        let mut args = TeachArgs::targets([1]);
        args.options.prob_a = Some(1.5);
        let err = apply(&args, &admin(), Dialogue::new("q", "a")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn guild_scope_is_relative_to_complement() {
        let mut args = TeachArgs::targets([1]);
        args.options.scope = GuildScope {
            reset: None,
            enable: Vec::new(),
            disable: vec!["g2".to_string(), "g1".to_string()],
        };
        let target = apply(&args, &admin(), Dialogue::new("q", "a")).unwrap();
        assert_eq!(target.guilds, vec!["g1", "g2"]);
        assert!(!target.is_enabled_in("g1"));
        assert!(target.is_enabled_in("g3"));

        args.options.scope = GuildScope {
            reset: Some(false),
            enable: vec!["g3".to_string()],
            disable: Vec::new(),
        };
        let target = apply(&args, &admin(), target.into_inner()).unwrap();
        assert_eq!(target.guilds, vec!["g3"]);
        assert!(target.is_enabled_in("g3"));
        assert!(!target.is_enabled_in("g1"));
    }

    #[test]
    fn predecessors_set_add_remove() {
        let mut d = Dialogue::new("q", "a");
        d.id = DialogueId(9);
        d.predecessors = vec![DialogueId(1), DialogueId(2)];
        let mut args = TeachArgs::targets([9]);
        args.options.add_predecessors = vec![DialogueId(5), DialogueId(1)];
        args.options.remove_predecessors = vec![DialogueId(2)];
        let target = apply(&args, &admin(), d.clone()).unwrap();
        assert_eq!(target.predecessors, vec![DialogueId(1), DialogueId(5)]);

        args.options.add_predecessors = vec![DialogueId(9)];
        let err = apply(&args, &admin(), d).unwrap_err();
        assert!(matches!(
            err,
            TeachError::Validation(ValidationError::SelfPredecessor { .. })
        ));
    }

    #[test]
    fn freezing_and_foreign_writer_need_authority() {
        let user = User::new("u", "U").with_authority(2);
        let mut args = TeachArgs::targets([1]);
        args.options.frozen = Some(true);
        assert!(apply(&args, &user, Dialogue::new("q", "a")).unwrap_err().is_permission());

        let mut args = TeachArgs::targets([1]);
        args.options.writer = Some(WriterOption::User("other".to_string()));
        assert!(apply(&args, &user, Dialogue::new("q", "a")).unwrap_err().is_permission());

        args.options.writer = Some(WriterOption::Anonymous);
        let mut d = Dialogue::new("q", "a");
        d.writer = Some("u".to_string());
        let target = apply(&args, &user, d).unwrap();
        assert_eq!(target.writer, None);
    }

    #[test]
    fn unchanged_values_leave_no_diff() {
        let mut args = TeachArgs::targets([1]);
        args.answer = Some("a".to_string());
        args.options.prob_s = Some(1.0);
        let target = apply(&args, &admin(), Dialogue::new("q", "a")).unwrap();
        assert!(!target.is_dirty());
    }

    #[test]
    fn permissions_follow_authority() {
        let config = TeachConfig::default();
        let args = TeachArgs::targets([1]);
        let user = User::new("u", "U").with_authority(2);
        let ctx = ctx(&args, &user, &config);

        let mut frozen = Dialogue::new("q", "a");
        frozen.flag.set(DialogueFlags::FROZEN, true);
        assert!(!FrozenPermission.can_edit(&ctx, &frozen));

        let mut foreign = Dialogue::new("q", "a");
        foreign.writer = Some("someone".to_string());
        assert!(!WriterPermission.can_edit(&ctx, &foreign));
        foreign.writer = Some("u".to_string());
        assert!(WriterPermission.can_edit(&ctx, &foreign));
        assert!(WriterPermission.can_edit(&ctx, &Dialogue::new("q", "a")));
    }
}
