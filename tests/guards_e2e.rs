use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use dialogue_engine::{
    BufferedResponder, Dialogue, InMemoryDialogueStore, LoopConfig, ManualClock, Message, Teach,
    TeachConfig, ThrottleConfig, User,
};

fn engine(config: TeachConfig) -> (Teach, Arc<ManualClock>) {
    let store = InMemoryDialogueStore::with_dialogues([Dialogue::new("ping", "pong")]).unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let teach = Teach::with_clock(config, Arc::new(store), Arc::<ManualClock>::clone(&clock)).unwrap();
    (teach, clock)
}

fn ping(teach: &Teach, context: &str, user: &str) -> bool {
    let mut out = BufferedResponder::new("bot");
    let message = Message::new(context, User::new(user, user), "ping");
    teach.receive(&message, &mut out).unwrap().is_some()
}

#[test]
fn throttle_restores_one_unit_per_interval() {
    let (teach, clock) = engine(TeachConfig {
        throttle: vec![ThrottleConfig {
            interval_ms: 10_000,
            responses: 2,
        }],
        prevent_loop: Vec::new(),
        ..TeachConfig::default()
    });

    assert!(ping(&teach, "g", "a"));
    clock.advance(Duration::seconds(2));
    assert!(ping(&teach, "g", "b"));
    assert!(!ping(&teach, "g", "c"));

    // Other contexts keep their own allowance.
    assert!(ping(&teach, "h", "c"));

    clock.advance(Duration::milliseconds(7_999));
    assert!(!ping(&teach, "g", "c"));
    clock.advance(Duration::milliseconds(1));
    assert!(ping(&teach, "g", "c"));
    assert!(!ping(&teach, "g", "c"));
}

#[test]
fn loop_guard_mutes_a_single_initiator() {
    let (teach, clock) = engine(TeachConfig {
        prevent_loop: vec![LoopConfig {
            participants: 1,
            length: 3,
            debounce_ms: 60_000,
        }],
        ..TeachConfig::default()
    });

    for _ in 0..3 {
        assert!(ping(&teach, "g", "alice"));
    }
    assert!(!ping(&teach, "g", "alice"));
    clock.advance(Duration::seconds(30));
    assert!(!ping(&teach, "g", "bob"));

    // A full debounce without detections lets the next reply through.
    clock.advance(Duration::seconds(61));
    assert!(ping(&teach, "g", "bob"));
    assert!(ping(&teach, "g", "alice"));
    assert!(ping(&teach, "g", "alice"));
}
