//! Corpus editing with history and revert.
//!
//! Every edit loads its targets as [`Observed`] dialogues, lets the modify
//! hooks change fields, and persists only what changed. The snapshot taken
//! before each persisted change goes to the [`History`], from which
//! [`Editor::revert`] restores it.

mod args;
mod history;
mod modifiers;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::TeachConfig;
use crate::dialogue::{normalize_ids, Dialogue, DialogueId};
use crate::error::{TeachResult, ValidationError};
use crate::hooks::HookRegistry;
use crate::observed::{Observed, Persist};
use crate::query::{translate, DialogueTest};
use crate::receiver::normalize_question;
use crate::session::User;
use crate::storage::{DialogueStore, StorePersister};
use crate::time::Clock;

pub use args::{Action, GuildScope, SearchOptions, TeachArgs, TeachOptions, WriterOption};
pub use history::{History, HistoryEntry, HistoryKind};
pub use modifiers::{
    builtin_modifiers, builtin_permissions, FlagHook, FrozenPermission, GuildHook, ProbabilityHook,
    QuestionAnswerHook, SuccessorHook, TimeHook, WriterHook, WriterPermission,
};

/// What modify and permission hooks see.
#[derive(Debug, Clone, Copy)]
pub struct EditContext<'a> {
    pub args: &'a TeachArgs,
    pub operator: &'a User,
    pub config: &'a TeachConfig,
    pub now: DateTime<Utc>,
    /// True while populating a brand-new dialogue.
    pub creating: bool,
}

/// Outcome of an edit command, per dialogue id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditReport {
    pub created: Vec<DialogueId>,
    /// Exact question/answer duplicates found instead of creating.
    pub existing: Vec<DialogueId>,
    pub updated: Vec<DialogueId>,
    /// Targets the command did not change.
    pub skipped: Vec<DialogueId>,
    pub uneditable: Vec<DialogueId>,
    pub missing: Vec<DialogueId>,
    pub removed: Vec<DialogueId>,
    pub reverted: Vec<DialogueId>,
    pub unrecoverable: Vec<DialogueId>,
}

fn join_ids(ids: &[DialogueId]) -> String {
    ids.iter().map(DialogueId::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for EditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        if !self.created.is_empty() {
            lines.push(format!("问答已添加，编号为 {}。", join_ids(&self.created)));
        }
        if !self.existing.is_empty() {
            lines.push(format!(
                "问答已存在，编号为 {}，如要修改请尝试使用 #{} 指令。",
                join_ids(&self.existing),
                self.existing[0]
            ));
        }
        if !self.updated.is_empty() {
            lines.push(format!("问答 {} 已成功修改。", join_ids(&self.updated)));
        }
        if !self.skipped.is_empty() {
            lines.push(format!("问答 {} 没有发生改动。", join_ids(&self.skipped)));
        }
        if !self.uneditable.is_empty() {
            lines.push(format!("问答 {} 因权限过低无法修改。", join_ids(&self.uneditable)));
        }
        if !self.missing.is_empty() {
            lines.push(format!("没有搜索到编号为 {} 的问答。", join_ids(&self.missing)));
        }
        if !self.removed.is_empty() {
            lines.push(format!("问答 {} 已成功删除。", join_ids(&self.removed)));
        }
        if !self.reverted.is_empty() {
            lines.push(format!("问答 {} 已成功还原。", join_ids(&self.reverted)));
        }
        if !self.unrecoverable.is_empty() {
            lines.push(format!(
                "问答 {} 没有可还原的历史记录。",
                join_ids(&self.unrecoverable)
            ));
        }
        f.write_str(&lines.join("\n"))
    }
}

/// Borrowed engine parts an edit runs against.
pub struct Editor<'e> {
    pub config: &'e TeachConfig,
    pub store: &'e Arc<dyn DialogueStore>,
    pub hooks: &'e HookRegistry,
    pub history: &'e History,
    pub clock: &'e dyn Clock,
}

impl Editor<'_> {
    fn context<'a>(&'a self, args: &'a TeachArgs, operator: &'a User, creating: bool) -> EditContext<'a> {
        EditContext {
            args,
            operator,
            config: self.config,
            now: self.clock.now(),
            creating,
        }
    }

    fn before_modify(&self, ctx: &EditContext<'_>) -> TeachResult<()> {
        for hook in self.hooks.modifiers() {
            hook.before_modify(ctx)?;
        }
        Ok(())
    }

    fn modify(&self, ctx: &EditContext<'_>, target: &mut Observed<Dialogue>) -> TeachResult<()> {
        for hook in self.hooks.modifiers() {
            hook.modify(ctx, target)?;
        }
        Ok(())
    }

    /// Split rows into editable ones and ids the operator may not touch.
    fn partition<'r>(
        &self,
        ctx: &EditContext<'_>,
        rows: &'r [Dialogue],
        report: &mut EditReport,
    ) -> Vec<&'r Dialogue> {
        let mut editable = Vec::with_capacity(rows.len());
        for row in rows {
            if self.hooks.can_edit(ctx, row) {
                editable.push(row);
            } else {
                report.uneditable.push(row.id);
            }
        }
        editable
    }

    fn load(&self, ids: &[DialogueId], report: &mut EditReport) -> TeachResult<Vec<Dialogue>> {
        if ids.is_empty() {
            return Err(ValidationError::NoTarget.into());
        }
        let ids = normalize_ids(ids.iter().copied());
        let rows = self.store.get_by_ids(&ids)?;
        let found: BTreeSet<DialogueId> = rows.iter().map(|d| d.id).collect();
        report.missing = ids.into_iter().filter(|id| !found.contains(id)).collect();
        Ok(rows)
    }

    /// Create a dialogue, or update exact duplicates when the command
    /// carries other modifications.
    pub fn create(&self, args: &TeachArgs, operator: &User) -> TeachResult<EditReport> {
        let (Some(question), Some(answer)) = (&args.question, &args.answer) else {
            let field = if args.question.is_none() { "question" } else { "answer" };
            return Err(ValidationError::MissingField {
                field: field.to_string(),
            }
            .into());
        };
        let ctx = self.context(args, operator, true);
        self.before_modify(&ctx)?;

        let stored_question = if args.options.regexp == Some(true) {
            question.trim().to_string()
        } else {
            normalize_question(question, self.config)
        };
        let lookup = DialogueTest {
            question: Some(stored_question),
            answer: Some(answer.clone()),
            regexp: Some(false),
            ..DialogueTest::default()
        };
        let existing = self
            .store
            .find(&translate(&lookup, self.hooks.predicates()))?;
        if !existing.is_empty() {
            let ids: Vec<DialogueId> = existing.iter().map(|d| d.id).collect();
            if args.has_option_changes() {
                return self.update(&ids, args, operator);
            }
            return Ok(EditReport {
                existing: ids,
                ..EditReport::default()
            });
        }

        let mut target = Observed::new(Dialogue {
            prob_s: self.config.default_prob_s,
            prob_a: self.config.default_prob_a,
            ..Dialogue::default()
        });
        self.modify(&ctx, &mut target)?;
        let created = self.store.create(target.into_inner())?;
        info!(dialogue = %created.id, operator = %operator.id, "dialogue created");

        self.history.record(
            [HistoryEntry {
                backup: created.clone(),
                kind: HistoryKind::Created,
                operator: operator.id.clone(),
                timestamp: ctx.now,
            }],
            ctx.now,
        )?;
        Ok(EditReport {
            created: vec![created.id],
            ..EditReport::default()
        })
    }

    /// Apply the command's modifications to existing dialogues.
    pub fn update(&self, ids: &[DialogueId], args: &TeachArgs, operator: &User) -> TeachResult<EditReport> {
        let mut report = EditReport::default();
        let ctx = self.context(args, operator, false);
        self.before_modify(&ctx)?;
        let rows = self.load(ids, &mut report)?;
        let persister: Arc<dyn Persist<Dialogue>> = Arc::new(StorePersister::new(Arc::clone(self.store)));

        // Every target must pass the modify hooks before any is persisted.
        let mut pending = Vec::new();
        for row in self.partition(&ctx, &rows, &mut report) {
            let mut target = Observed::wrap(row.clone(), Arc::clone(&persister));
            self.modify(&ctx, &mut target)?;
            if target.is_dirty() {
                pending.push((row, target));
            } else {
                report.skipped.push(row.id);
            }
        }

        for (row, mut target) in pending {
            let diff = target.commit()?;
            info!(
                dialogue = %row.id,
                operator = %operator.id,
                fields = diff.len(),
                "dialogue updated"
            );
            self.history.record(
                [HistoryEntry {
                    backup: row.clone(),
                    kind: HistoryKind::Modified,
                    operator: operator.id.clone(),
                    timestamp: ctx.now,
                }],
                ctx.now,
            )?;
            report.updated.push(row.id);
        }
        Ok(report)
    }

    /// Delete dialogues, keeping their snapshots for revert.
    pub fn remove(&self, ids: &[DialogueId], operator: &User) -> TeachResult<EditReport> {
        let mut report = EditReport::default();
        let args = TeachArgs::default();
        let ctx = self.context(&args, operator, false);
        let rows = self.load(ids, &mut report)?;
        let editable = self.partition(&ctx, &rows, &mut report);
        if editable.is_empty() {
            return Ok(report);
        }

        let removed: Vec<DialogueId> = editable.iter().map(|d| d.id).collect();
        self.store.remove(&removed)?;
        info!(dialogues = %join_ids(&removed), operator = %operator.id, "dialogues removed");
        self.history.record(
            editable.into_iter().map(|row| HistoryEntry {
                backup: row.clone(),
                kind: HistoryKind::Deleted,
                operator: operator.id.clone(),
                timestamp: ctx.now,
            }),
            ctx.now,
        )?;
        report.removed = removed;
        Ok(report)
    }

    /// Undo the latest recorded edit of each id.
    ///
    /// A creation is undone by deleting the row; a modification or removal
    /// by restoring the snapshot verbatim.
    pub fn revert(&self, ids: &[DialogueId], operator: &User) -> TeachResult<EditReport> {
        if ids.is_empty() {
            return Err(ValidationError::NoTarget.into());
        }
        let ids = normalize_ids(ids.iter().copied());
        let mut report = EditReport::default();
        let args = TeachArgs::default();
        let ctx = self.context(&args, operator, false);
        let entries = self.history.get(&ids, ctx.now)?;

        let known: BTreeSet<DialogueId> = entries.iter().map(|e| e.backup.id).collect();
        report.unrecoverable = ids.into_iter().filter(|id| !known.contains(id)).collect();

        let mut created = Vec::new();
        let mut restored = Vec::new();
        for entry in entries {
            if !self.hooks.can_edit(&ctx, &entry.backup) {
                report.uneditable.push(entry.backup.id);
                continue;
            }
            match entry.kind {
                HistoryKind::Created => created.push(entry.backup.id),
                HistoryKind::Modified | HistoryKind::Deleted => restored.push(entry.backup),
            }
        }

        if !created.is_empty() {
            self.store.remove(&created)?;
            self.history.forget(&created)?;
            report.reverted.extend(created);
        }
        if !restored.is_empty() {
            let restored_ids: Vec<DialogueId> = restored.iter().map(|d| d.id).collect();
            self.store.upsert(restored)?;
            self.history.forget(&restored_ids)?;
            report.reverted.extend(restored_ids);
        }
        report.reverted.sort_unstable();
        if !report.reverted.is_empty() {
            info!(
                dialogues = %join_ids(&report.reverted),
                operator = %operator.id,
                "dialogues reverted"
            );
        }
        Ok(report)
    }

    /// Live history entries, newest first.
    pub fn review(&self) -> TeachResult<Vec<HistoryEntry>> {
        self.history.list(self.clock.now())
    }

    /// Load dialogues for the detail view.
    pub fn detail(&self, ids: &[DialogueId]) -> TeachResult<(Vec<Dialogue>, EditReport)> {
        let mut report = EditReport::default();
        let rows = self.load(ids, &mut report)?;
        Ok((rows, report))
    }
}
