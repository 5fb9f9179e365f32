//! Operator-facing rendering: listing lines, detail views, pagination and
//! history review.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TeachConfig;
use crate::dialogue::{Dialogue, DialogueFlags};
use crate::edit::HistoryEntry;
use crate::error::ValidationError;
use crate::hooks::{DetailHook, HookRegistry};

/// Probability badges and weights.
#[derive(Debug, Default)]
pub struct ProbabilityDetail;

impl DetailHook for ProbabilityDetail {
    fn name(&self) -> &str {
        "probability"
    }

    fn badge(&self, dialogue: &Dialogue, _config: &TeachConfig) -> Option<String> {
        let mut parts = Vec::new();
        if (dialogue.prob_s - 1.0).abs() > f64::EPSILON {
            parts.push(format!("p={}", dialogue.prob_s));
        }
        if dialogue.prob_a > 0.0 {
            parts.push(format!("P={}", dialogue.prob_a));
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    fn detail(&self, dialogue: &Dialogue, _config: &TeachConfig, output: &mut Vec<String>) {
        output.push(format!(
            "触发权重：p={}, P={}",
            dialogue.prob_s, dialogue.prob_a
        ));
    }
}

/// Activity window.
#[derive(Debug, Default)]
pub struct TimeDetail;

impl DetailHook for TimeDetail {
    fn name(&self) -> &str {
        "time"
    }

    fn badge(&self, dialogue: &Dialogue, _config: &TeachConfig) -> Option<String> {
        let window = dialogue.time_window();
        (!window.is_always()).then(|| window.to_string())
    }

    fn detail(&self, dialogue: &Dialogue, _config: &TeachConfig, output: &mut Vec<String>) {
        let window = dialogue.time_window();
        if !window.is_always() {
            output.push(format!("触发时段：{window}"));
        }
    }
}

/// Guild scope.
#[derive(Debug, Default)]
pub struct GuildDetail;

impl DetailHook for GuildDetail {
    fn name(&self) -> &str {
        "guild"
    }

    fn detail(&self, dialogue: &Dialogue, _config: &TeachConfig, output: &mut Vec<String>) {
        let complement = dialogue.flag.contains(DialogueFlags::COMPLEMENT);
        let guilds = dialogue.guilds.join(", ");
        let line = match (complement, dialogue.guilds.is_empty()) {
            (true, true) => "生效环境：全局".to_string(),
            (true, false) => format!("生效环境：除 {guilds} 以外的所有环境"),
            (false, true) => "生效环境：全局禁用".to_string(),
            (false, false) => format!("生效环境：{guilds}"),
        };
        output.push(line);
    }
}

/// Flags and authorship.
#[derive(Debug, Default)]
pub struct FlagDetail;

impl DetailHook for FlagDetail {
    fn name(&self) -> &str {
        "flag"
    }

    fn badge(&self, dialogue: &Dialogue, _config: &TeachConfig) -> Option<String> {
        dialogue.is_frozen().then(|| "锁定".to_string())
    }

    fn detail(&self, dialogue: &Dialogue, _config: &TeachConfig, output: &mut Vec<String>) {
        if dialogue.is_regexp() {
            output.push("正则表达式：是".to_string());
        }
        match &dialogue.writer {
            Some(writer) => output.push(format!("来源：{writer}")),
            None => output.push("来源：匿名".to_string()),
        }
        if dialogue.flag.contains(DialogueFlags::SUBSTITUTE) {
            output.push("回答中的指令由作者代为执行。".to_string());
        }
        if dialogue.is_frozen() {
            output.push("此问答已锁定。".to_string());
        }
    }
}

/// Predecessors.
#[derive(Debug, Default)]
pub struct SuccessorDetail;

impl DetailHook for SuccessorDetail {
    fn name(&self) -> &str {
        "successor"
    }

    fn badge(&self, dialogue: &Dialogue, _config: &TeachConfig) -> Option<String> {
        (!dialogue.predecessors.is_empty()).then(|| "后继".to_string())
    }

    fn detail(&self, dialogue: &Dialogue, _config: &TeachConfig, output: &mut Vec<String>) {
        if !dialogue.predecessors.is_empty() {
            let ids: Vec<String> = dialogue.predecessors.iter().map(|id| format!("#{id}")).collect();
            output.push(format!("前置问题：{}", ids.join(", ")));
            if dialogue.flag.contains(DialogueFlags::CONTEXT) {
                output.push("可由任何人触发后继。".to_string());
            }
        }
        if dialogue.successor_timeout != 0 {
            output.push(format!("后继超时：{} 秒", dialogue.successor_timeout / 1000));
        }
    }
}

/// The built-in detail hooks, in output order.
#[must_use]
pub fn builtin_details() -> Vec<Arc<dyn DetailHook>> {
    vec![
        Arc::new(FlagDetail),
        Arc::new(ProbabilityDetail),
        Arc::new(TimeDetail),
        Arc::new(GuildDetail),
        Arc::new(SuccessorDetail),
    ]
}

/// Badges of every detail hook, e.g. ` [p=0.5] [08:00-09:00]`.
#[must_use]
pub fn badges(dialogue: &Dialogue, hooks: &HookRegistry, config: &TeachConfig) -> String {
    hooks
        .details()
        .iter()
        .filter_map(|hook| hook.badge(dialogue, config))
        .map(|badge| format!(" [{badge}]"))
        .collect()
}

/// `id. text [badges]`.
#[must_use]
pub fn listing_line(dialogue: &Dialogue, text: &str, hooks: &HookRegistry, config: &TeachConfig) -> String {
    format!("{}. {text}{}", dialogue.id, badges(dialogue, hooks, config))
}

/// The detail view of one dialogue.
#[must_use]
pub fn detail(dialogue: &Dialogue, hooks: &HookRegistry, config: &TeachConfig) -> String {
    let mut lines = vec![
        format!("编号为 {} 的问答信息：", dialogue.id),
        format!("问题：{}", dialogue.original),
        format!("回答：{}", dialogue.answer),
    ];
    for hook in hooks.details() {
        hook.detail(dialogue, config, &mut lines);
    }
    lines.join("\n")
}

/// Slice `lines` to one page under `header`.
///
/// Output fitting on one page has no footer; otherwise `第 p/n 页` is
/// appended.
pub fn paginate(
    header: &str,
    lines: &[String],
    page: usize,
    per_page: usize,
) -> Result<String, ValidationError> {
    let per_page = per_page.max(1);
    let pages = lines.len().div_ceil(per_page).max(1);
    if page == 0 || page > pages {
        return Err(ValidationError::PageOutOfRange { page, pages });
    }
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(lines.len());

    let mut output = Vec::with_capacity(end - start + 2);
    output.push(header.to_string());
    output.extend(lines[start..end].iter().cloned());
    if pages > 1 {
        output.push(format!("第 {page}/{pages} 页"));
    }
    Ok(output.join("\n"))
}

/// History listing, newest first.
#[must_use]
pub fn review(entries: &[HistoryEntry], now: DateTime<Utc>) -> String {
    if entries.is_empty() {
        return "近期没有处理过任何问答。".to_string();
    }
    let mut lines = vec!["近期处理过的问答如下：".to_string()];
    for entry in entries {
        let minutes = (now - entry.timestamp).num_minutes().max(0);
        lines.push(format!(
            "{}. [{}] {} => {}（{}，{} 分钟前）",
            entry.backup.id,
            entry.kind,
            entry.backup.original,
            entry.backup.answer,
            entry.operator,
            minutes
        ));
    }
    lines.join("\n")
}
