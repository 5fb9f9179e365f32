use std::sync::Arc;

use dialogue_engine::{
    Dialogue, DialogueFlags, InMemoryDialogueStore, Teach, TeachArgs, TeachConfig, User,
};

fn regex(pattern: &str, answer: &str) -> Dialogue {
    let mut d = Dialogue::new(pattern, answer);
    d.flag.set(DialogueFlags::REGEXP, true);
    d
}

fn engine(config: TeachConfig, dialogues: Vec<Dialogue>) -> Teach {
    let store = InMemoryDialogueStore::with_dialogues(dialogues).unwrap();
    Teach::new(config, Arc::new(store)).unwrap()
}

fn anyone() -> User {
    User::new("u", "U")
}

fn regex_search(question: Option<&str>, answer: Option<&str>) -> TeachArgs {
    let mut args = TeachArgs::search(question, answer);
    args.options.search.regexp = true;
    args
}

#[test]
fn shared_answers_merge_past_the_threshold() {
    let dialogues = (1..=6).map(|i| regex(&format!("^x{i}$"), "X")).collect();
    let teach = engine(TeachConfig::default(), dialogues);

    let out = teach.execute(&anyone(), &regex_search(Some("^x"), None)).unwrap();
    assert_eq!(out, "问题正则表达式“^x”的搜索结果如下：\nX (共 6 个问题)");
}

#[test]
fn shared_questions_merge_for_answer_searches() {
    let dialogues = (1..=7).map(|i| Dialogue::new("greet", format!("hello #{i}"))).collect();
    let teach = engine(TeachConfig::default(), dialogues);

    let out = teach.execute(&anyone(), &regex_search(None, Some("^hello"))).unwrap();
    assert_eq!(out, "回答正则表达式“^hello”的搜索结果如下：\ngreet (共 7 个回答)");
}

#[test]
fn results_are_paginated() {
    let config = TeachConfig {
        items_per_page: 3,
        ..TeachConfig::default()
    };
    let dialogues = (1..=7).map(|i| Dialogue::new("q", format!("a{i}"))).collect();
    let teach = engine(config, dialogues);

    let mut args = TeachArgs::search(Some("q"), None);
    assert_eq!(
        teach.execute(&anyone(), &args).unwrap(),
        "问题“q”的回答如下：\n1. a1\n2. a2\n3. a3\n第 1/3 页"
    );

    args.options.search.page = 3;
    assert_eq!(
        teach.execute(&anyone(), &args).unwrap(),
        "问题“q”的回答如下：\n7. a7\n第 3/3 页"
    );

    args.options.search.page = 4;
    assert!(teach.execute(&anyone(), &args).unwrap_err().is_validation());
}

#[test]
fn guild_filters_narrow_the_listing() {
    let mut scoped = Dialogue::new("rules", "guild rules");
    scoped.flag.set(DialogueFlags::COMPLEMENT, false);
    scoped.set_guilds(["g1".to_string()]);
    let teach = engine(
        TeachConfig::default(),
        vec![scoped, Dialogue::new("rules", "global rules")],
    );

    let mut args = TeachArgs::search(Some("rules"), None);
    args.options.search.guilds = vec!["g2".to_string()];
    assert_eq!(
        teach.execute(&anyone(), &args).unwrap(),
        "问题“rules”的回答如下：\n2. global rules"
    );

    args.options.search.reversed = true;
    assert_eq!(
        teach.execute(&anyone(), &args).unwrap(),
        "问题“rules”的回答如下：\n1. guild rules"
    );
}

#[test]
fn nothing_found_explains_itself() {
    let teach = engine(TeachConfig::default(), Vec::new());
    assert_eq!(
        teach.execute(&anyone(), &TeachArgs::search(None, None)).unwrap(),
        "没有搜索到任何问答。"
    );
    assert_eq!(
        teach.execute(&anyone(), &TeachArgs::search(Some("hi"), None)).unwrap(),
        "没有搜索到问题“hi”，请尝试使用正则表达式匹配。"
    );
}
