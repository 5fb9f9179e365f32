use std::io::Write;
use std::sync::Arc;
use std::thread;

use dialogue_engine::{
    Action, Dialogue, InMemoryDialogueStore, Message, Teach, TeachArgs, TeachConfig, TeachRuntime,
    User,
};

fn config_from_file(json: &str) -> TeachConfig {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    TeachConfig::from_path(file.path()).unwrap()
}

#[test]
fn runtime_serves_messages_and_commands_from_a_config_file() {
    let config = config_from_file(
        r#"{
            "nicknames": ["bot"],
            "prevent_loop": [],
            "seed": 9,
            "runtime": { "queue_capacity": 4 }
        }"#,
    );
    assert_eq!(config.runtime.queue_capacity, 4);

    let store = InMemoryDialogueStore::with_dialogues([Dialogue::new("hi", "hello $s")]).unwrap();
    let runtime = TeachRuntime::start(Teach::new(config, Arc::new(store)).unwrap(), "bot").unwrap();

    let delivery = runtime
        .receive(Message::new("g", User::new("u1", "Alice"), "hi"))
        .unwrap();
    assert_eq!(delivery.sent, vec!["hello Alice"]);

    let teacher = User::new("t", "Teacher").with_authority(2);
    let mut update = TeachArgs::targets([1]);
    update.answer = Some("hey".to_string());
    assert_eq!(runtime.execute(teacher.clone(), update).unwrap(), "问答 1 已成功修改。");
    assert_eq!(
        runtime
            .receive(Message::new("g", User::new("u2", "Bob"), "hi"))
            .unwrap()
            .sent,
        vec!["hey"]
    );

    let revert = TeachArgs::targets([1]).with_action(Action::Revert);
    assert_eq!(runtime.execute(teacher, revert).unwrap(), "问答 1 已成功还原。");
    runtime.shutdown();
}

#[test]
fn concurrent_callers_are_serialized() {
    let config = TeachConfig {
        prevent_loop: Vec::new(),
        seed: Some(5),
        ..TeachConfig::default()
    };
    let teach = Teach::new(config, Arc::new(InMemoryDialogueStore::new())).unwrap();
    let runtime = Arc::new(TeachRuntime::start(teach, "bot").unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || {
                let teacher = User::new(format!("t{i}"), "Teacher").with_authority(2);
                runtime
                    .execute(teacher, TeachArgs::create(format!("q{i}"), "a"))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().starts_with("问答已添加，编号为 "));
    }

    assert_eq!(runtime.engine().store().count().unwrap(), 8);
    assert_eq!(runtime.dropped(), 0);
}
