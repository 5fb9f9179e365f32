//! Corpus search.
//!
//! A search names a question, an answer, both or neither, literally or as
//! patterns. Results list the field the operator did not give. Pattern
//! searches may merge dialogues sharing that field into a single line.

use std::collections::HashMap;

use crate::config::TeachConfig;
use crate::dialogue::Dialogue;
use crate::edit::TeachArgs;
use crate::error::TeachResult;
use crate::format::{listing_line, paginate};
use crate::hooks::HookRegistry;
use crate::query::{cached_regex, translate, DialogueTest};
use crate::receiver::normalize_question;
use crate::storage::DialogueStore;

/// A dialogue with its redirection expanded for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub dialogue: Dialogue,
    /// Answers reached by following a `$(dialogue ..)` answer.
    pub redirections: Vec<String>,
}

impl Resolved {
    /// The answer as shown in listings.
    #[must_use]
    pub fn answer(&self) -> String {
        if self.redirections.is_empty() {
            self.dialogue.answer.clone()
        } else {
            format!("{} = {}", self.dialogue.answer, self.redirections.join(" | "))
        }
    }
}

/// Borrowed engine parts a search runs against.
pub struct Searcher<'e> {
    pub config: &'e TeachConfig,
    pub store: &'e dyn DialogueStore,
    pub hooks: &'e HookRegistry,
}

impl Searcher<'_> {
    /// Run a search and render the requested page.
    pub fn search(&self, args: &TeachArgs) -> TeachResult<String> {
        let options = &args.options.search;
        let regexp = options.regexp;
        let question = args.question.as_deref().map(str::trim).filter(|q| !q.is_empty());
        let answer = args.answer.as_deref().map(str::trim).filter(|a| !a.is_empty());

        if regexp {
            for pattern in [question, answer].into_iter().flatten() {
                cached_regex(pattern, false)?;
            }
        }

        let test = DialogueTest {
            question: question.map(|q| {
                if regexp {
                    q.to_string()
                } else {
                    normalize_question(q, self.config)
                }
            }),
            answer: answer.map(str::to_string),
            regexp: Some(regexp),
            guilds: options.guilds.clone(),
            reversed: options.reversed,
            partial: options.partial,
            ..DialogueTest::default()
        };
        let found = self.store.find(&translate(&test, self.hooks.predicates()))?;
        let resolved = if options.recursive {
            self.resolve_all(found)?
        } else {
            found
                .into_iter()
                .map(|dialogue| Resolved {
                    dialogue,
                    redirections: Vec::new(),
                })
                .collect()
        };

        let (header, lines) = match (question, answer, regexp) {
            (None, None, _) => {
                if resolved.is_empty() {
                    return Ok("没有搜索到任何问答。".to_string());
                }
                let lines = resolved
                    .iter()
                    .map(|r| self.line(r, &format!("{} => {}", r.dialogue.original, r.answer())))
                    .collect();
                ("全部问答如下：".to_string(), lines)
            }
            (Some(q), None, false) => {
                if resolved.is_empty() {
                    return Ok(format!("没有搜索到问题“{q}”，请尝试使用正则表达式匹配。"));
                }
                let lines = resolved.iter().map(|r| self.line(r, &r.answer())).collect();
                (format!("问题“{q}”的回答如下："), lines)
            }
            (None, Some(a), false) => {
                if resolved.is_empty() {
                    return Ok(format!("没有搜索到回答“{a}”，请尝试使用正则表达式匹配。"));
                }
                let lines = resolved
                    .iter()
                    .map(|r| self.line(r, &r.dialogue.original))
                    .collect();
                (format!("回答“{a}”的问题如下："), lines)
            }
            (Some(q), Some(a), false) => {
                if resolved.is_empty() {
                    return Ok(format!("没有搜索到问答“{q}”=>“{a}”，请尝试使用正则表达式匹配。"));
                }
                let ids: Vec<String> = resolved.iter().map(|r| r.dialogue.id.to_string()).collect();
                return Ok(format!("“{q}”=>“{a}”的问答编号为 {}。", ids.join(", ")));
            }
            (Some(q), None, true) => {
                if resolved.is_empty() {
                    return Ok(format!("没有搜索到含有正则表达式“{q}”的问题。"));
                }
                let lines = if options.auto_merge {
                    self.merge(&resolved, Resolved::answer, "问题")
                } else {
                    self.pairs(&resolved)
                };
                (format!("问题正则表达式“{q}”的搜索结果如下："), lines)
            }
            (None, Some(a), true) => {
                if resolved.is_empty() {
                    return Ok(format!("没有搜索到含有正则表达式“{a}”的回答。"));
                }
                let lines = if options.auto_merge {
                    self.merge(&resolved, |r| r.dialogue.original.clone(), "回答")
                } else {
                    self.pairs(&resolved)
                };
                (format!("回答正则表达式“{a}”的搜索结果如下："), lines)
            }
            (Some(q), Some(a), true) => {
                if resolved.is_empty() {
                    return Ok(format!("没有搜索到含有正则表达式“{q}”=>“{a}”的问答。"));
                }
                (
                    format!("问答正则表达式“{q}”=>“{a}”的搜索结果如下："),
                    self.pairs(&resolved),
                )
            }
        };
        Ok(paginate(&header, &lines, options.page, self.config.items_per_page)?)
    }

    fn line(&self, resolved: &Resolved, text: &str) -> String {
        listing_line(&resolved.dialogue, text, self.hooks, self.config)
    }

    fn pairs(&self, resolved: &[Resolved]) -> Vec<String> {
        resolved
            .iter()
            .map(|r| self.line(r, &format!("{} => {}", r.dialogue.original, r.answer())))
            .collect()
    }

    /// One line per distinct `key`, in order of first appearance.
    fn merge<F>(&self, resolved: &[Resolved], key: F, counted: &str) -> Vec<String>
    where
        F: Fn(&Resolved) -> String,
    {
        let mut groups: Vec<(String, Vec<&Resolved>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for r in resolved {
            let value = key(r);
            match index.get(&value) {
                Some(&i) => groups[i].1.push(r),
                None => {
                    index.insert(value.clone(), groups.len());
                    groups.push((value, vec![r]));
                }
            }
        }
        groups
            .into_iter()
            .map(|(value, members)| {
                if members.len() > self.config.merge_threshold {
                    format!("{value} (共 {} 个{counted})", members.len())
                } else {
                    let ids: Vec<String> = members.iter().map(|r| format!("#{}", r.dialogue.id)).collect();
                    format!("{value} ({})", ids.join(", "))
                }
            })
            .collect()
    }

    fn resolve_all(&self, found: Vec<Dialogue>) -> TeachResult<Vec<Resolved>> {
        let mut memo: HashMap<String, Vec<String>> = HashMap::new();
        found
            .into_iter()
            .map(|dialogue| {
                let redirections = match dialogue.redirection() {
                    Some(target) => self.expand(target, &mut memo, 1)?,
                    None => Vec::new(),
                };
                Ok(Resolved {
                    dialogue,
                    redirections,
                })
            })
            .collect()
    }

    /// Answers reachable from `question`, following further redirections.
    ///
    /// Each normalized question is expanded at most once; repeats, cycles
    /// included, reuse whatever the first expansion produced.
    fn expand(
        &self,
        question: &str,
        memo: &mut HashMap<String, Vec<String>>,
        depth: usize,
    ) -> TeachResult<Vec<String>> {
        let key = normalize_question(question, self.config);
        if let Some(answers) = memo.get(&key) {
            return Ok(answers.clone());
        }
        memo.insert(key.clone(), Vec::new());
        if depth > self.config.max_redirections {
            return Ok(Vec::new());
        }

        let test = DialogueTest {
            question: Some(key.clone()),
            regexp: Some(false),
            ..DialogueTest::default()
        };
        let mut answers = Vec::new();
        for dialogue in self.store.find(&translate(&test, self.hooks.predicates()))? {
            match dialogue.redirection() {
                Some(next) => answers.extend(self.expand(next, memo, depth + 1)?),
                None => answers.push(dialogue.answer),
            }
        }
        memo.insert(key, answers.clone());
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::DialogueFlags;
    use crate::edit::Action;
    use crate::error::{TeachError, ValidationError};
    use crate::storage::InMemoryDialogueStore;

    struct Fixture {
        config: TeachConfig,
        store: InMemoryDialogueStore,
        hooks: HookRegistry,
    }

    impl Fixture {
        fn new(dialogues: Vec<Dialogue>) -> Self {
            let config = TeachConfig::default();
            Self {
                hooks: HookRegistry::builtin(&config),
                config,
                store: InMemoryDialogueStore::with_dialogues(dialogues).unwrap(),
            }
        }

        fn search(&self, args: &TeachArgs) -> TeachResult<String> {
            Searcher {
                config: &self.config,
                store: &self.store,
                hooks: &self.hooks,
            }
            .search(args)
        }
    }

    fn regex_search(question: Option<&str>, answer: Option<&str>) -> TeachArgs {
        let mut args = TeachArgs::search(question, answer);
        args.options.search.regexp = true;
        args
    }

    fn regex_dialogue(pattern: &str, answer: &str) -> Dialogue {
        let mut d = Dialogue::new(pattern, answer);
        d.flag.set(DialogueFlags::REGEXP, true);
        d
    }

    #[test]
    fn literal_question_lists_answers() {
        let fx = Fixture::new(vec![Dialogue::new("hi", "hello"), Dialogue::new("hi", "hey")]);
        let out = fx.search(&TeachArgs::search(Some("Hi!"), None)).unwrap();
        assert_eq!(out, "问题“Hi!”的回答如下：\n1. hello\n2. hey");

        let out = fx.search(&TeachArgs::search(Some("bye"), None)).unwrap();
        assert!(out.starts_with("没有搜索到问题“bye”"));
    }

    #[test]
    fn literal_answer_lists_questions() {
        let fx = Fixture::new(vec![Dialogue::new("hi", "hello"), Dialogue::new("yo", "hello")]);
        let out = fx.search(&TeachArgs::search(None, Some("hello"))).unwrap();
        assert_eq!(out, "回答“hello”的问题如下：\n1. hi\n2. yo");
    }

    #[test]
    fn both_fields_report_ids() {
        let fx = Fixture::new(vec![Dialogue::new("hi", "hello")]);
        let out = fx.search(&TeachArgs::search(Some("hi"), Some("hello"))).unwrap();
        assert_eq!(out, "“hi”=>“hello”的问答编号为 1。");
    }

    #[test]
    fn regex_search_merges_above_threshold() {
        let mut dialogues: Vec<Dialogue> = (0..6).map(|i| regex_dialogue(&format!("^q{i}$"), "X")).collect();
        dialogues.push(regex_dialogue("^q9$", "Y"));
        dialogues.push(regex_dialogue("^q8$", "Y"));
        let fx = Fixture::new(dialogues);

        let out = fx.search(&regex_search(Some("q"), None)).unwrap();
        assert_eq!(
            out,
            "问题正则表达式“q”的搜索结果如下：\nX (共 6 个问题)\nY (#7, #8)"
        );
    }

    #[test]
    fn regex_answer_search_groups_questions() {
        let fx = Fixture::new(vec![
            Dialogue::new("hi", "hello"),
            Dialogue::new("hi", "hello there"),
            Dialogue::new("yo", "nope"),
        ]);
        let out = fx.search(&regex_search(None, Some("^hello"))).unwrap();
        assert_eq!(out, "回答正则表达式“^hello”的搜索结果如下：\nhi (#1, #2)");

        let mut args = regex_search(None, Some("^hello"));
        args.options.search.auto_merge = false;
        let out = fx.search(&args).unwrap();
        assert_eq!(
            out,
            "回答正则表达式“^hello”的搜索结果如下：\n1. hi => hello\n2. hi => hello there"
        );
    }

    #[test]
    fn invalid_pattern_is_a_validation_error() {
        let fx = Fixture::new(Vec::new());
        let err = fx.search(&regex_search(Some("("), None)).unwrap_err();
        assert!(matches!(
            err,
            TeachError::Validation(ValidationError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn redirections_are_expanded_once() {
        let fx = Fixture::new(vec![
            Dialogue::new("a", "$(dialogue b)"),
            Dialogue::new("b", "bee"),
            Dialogue::new("c", "$(dialogue c)"),
        ]);
        let out = fx.search(&TeachArgs::search(Some("a"), None)).unwrap();
        assert_eq!(out, "问题“a”的回答如下：\n1. $(dialogue b) = bee");

        // A self-redirection terminates.
        let out = fx.search(&TeachArgs::search(Some("c"), None)).unwrap();
        assert_eq!(out, "问题“c”的回答如下：\n3. $(dialogue c)");
    }

    #[test]
    fn listing_everything_paginates() {
        let mut fx = Fixture::new((0..5).map(|i| Dialogue::new(format!("q{i}"), "a")).collect());
        fx.config.items_per_page = 2;
        let mut args = TeachArgs::search(None, None).with_action(Action::Search);
        args.options.search.page = 3;
        let out = fx.search(&args).unwrap();
        assert_eq!(out, "全部问答如下：\n5. q4 => a\n第 3/3 页");

        args.options.search.page = 4;
        let err = fx.search(&args).unwrap_err();
        assert!(err.is_validation());
    }
}
