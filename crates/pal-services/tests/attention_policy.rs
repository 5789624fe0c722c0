use pal_bus::EventFilter;
use pal_services::{Services, StartSessionOptions};
use pal_store::{queries, Store};
use pal_types::{
    AttentionLevel, CheckpointTrigger, CompactTrigger, EventType, PalConfig, SessionType,
};
use serde_json::json;

fn services() -> Services {
    Services::new(Store::open_in_memory().unwrap(), PalConfig::default())
}

fn start_session(services: &Services, id: &str) {
    let mut opts = StartSessionOptions::new(SessionType::Worker, "/work/proj", "/work/proj");
    opts.id = Some(id.to_string());
    services.sessions().start(opts).unwrap();
}

#[test]
fn auto_checkpoint_fires_once_per_crossing() {
    let services = services();
    start_session(&services, "S1");
    services.attention().init("S1", Some(1000)).unwrap();

    let mut warnings = services
        .bus()
        .subscribe(EventFilter::for_kinds(["attention:warning"]));

    // climb to 800: the 80% threshold crossing fires exactly one checkpoint
    let mut fired = Vec::new();
    for _ in 0..4 {
        let outcome = services.attention().observe("S1", 200, &[], &[]).unwrap();
        fired.extend(outcome.checkpoint_id);
    }
    assert_eq!(fired.len(), 1);

    let checkpoint = services.checkpoints().get(fired[0]).unwrap();
    assert_eq!(checkpoint.trigger_type, CheckpointTrigger::AutoThreshold);
    assert!(checkpoint.summary.contains("threshold:0.80"));

    // further observes up to 900 warn but do not re-fire
    let outcome = services.attention().observe("S1", 100, &[], &[]).unwrap();
    assert_eq!(outcome.level, AttentionLevel::Warning);
    assert!(outcome.checkpoint_id.is_none());
    assert!(warnings.try_recv().is_some());

    let checkpoint_events = services
        .sessions()
        .events("S1", None)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::CheckpointCreated)
        .count();
    assert_eq!(checkpoint_events, 1);

    // compaction clears the latch; the next crossing may re-fire
    services
        .attention()
        .record_compact(
            "S1",
            CompactTrigger::TokenLimit,
            900,
            100,
            None,
            None,
            None,
        )
        .unwrap();

    let state = services.attention().get("S1").unwrap();
    assert_eq!(state.loaded_tokens, 100);
    assert!(!state.checkpoint_fired);

    let outcome = services.attention().observe("S1", 700, &[], &[]).unwrap();
    assert!(outcome.checkpoint_id.is_some());
}

#[test]
fn compaction_bookkeeping() {
    let services = services();
    start_session(&services, "S1");
    services.attention().init("S1", Some(1000)).unwrap();
    services.attention().observe("S1", 900, &[], &[]).unwrap();

    let compact = services
        .attention()
        .record_compact(
            "S1",
            CompactTrigger::TokenLimit,
            900,
            100,
            Some("kept port spec"),
            Some("dropped exploration"),
            Some("reload src/lib.rs"),
        )
        .unwrap();

    // session counter incremented exactly once
    let session = services.sessions().get("S1").unwrap();
    assert_eq!(session.compact_count, 1);
    assert!(session.last_compact_at.is_some());

    // exactly one compact row with matching before/after
    let compacts = services.attention().history("S1", 10).unwrap();
    assert_eq!(compacts.len(), 1);
    assert_eq!(compacts[0].before_tokens, 900);
    assert_eq!(compacts[0].after_tokens, 100);
    assert_eq!(compacts[0].id, compact.id);

    // loaded tokens reset to the surviving count
    let state = services.attention().get("S1").unwrap();
    assert_eq!(state.loaded_tokens, 100);
    assert_eq!(state.drift_count, 0);

    // the compact references the pre-compact checkpoint
    let checkpoint = services
        .checkpoints()
        .get(compact.checkpoint_before)
        .unwrap();
    assert_eq!(checkpoint.trigger_type, CheckpointTrigger::PreCompact);
}

#[test]
fn drift_rises_on_new_files_and_decays_in_scope() {
    let services = services();
    start_session(&services, "S1");
    services.attention().init("S1", Some(10_000)).unwrap();

    let outcome = services
        .attention()
        .observe("S1", 100, &["src/lib.rs".to_string()], &[])
        .unwrap();
    let after_broaden = outcome.state.drift_score;
    assert!(after_broaden > 0.0);
    assert_eq!(outcome.state.drift_count, 1);

    // same file again: in scope now, drift decays
    let outcome = services
        .attention()
        .observe("S1", 100, &["src/lib.rs".to_string()], &[])
        .unwrap();
    assert!(outcome.state.drift_score < after_broaden);
    assert_eq!(outcome.state.drift_count, 1);

    // out-of-scope edit logs untracked_edit, in-scope logs file_edit
    let events = services.sessions().events("S1", None).unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::UntrackedEdit));
    assert!(events.iter().any(|e| e.event_type == EventType::FileEdit));
}

#[test]
fn focus_never_rises_between_compactions() {
    let services = services();
    start_session(&services, "S1");
    services.attention().init("S1", Some(1000)).unwrap();

    let mut last_focus = 1.0_f64;
    for (delta, files) in [
        (100, vec!["a.rs".to_string()]),
        (100, vec![]),
        (100, vec![]),
        (100, vec![]),
    ] {
        let outcome = services
            .attention()
            .observe("S1", delta, &files, &[])
            .unwrap();
        assert!(outcome.state.focus_score <= last_focus + 1e-9);
        last_focus = outcome.state.focus_score;
    }
}

#[test]
fn restore_bundle_is_deterministic() {
    let services = services();
    start_session(&services, "S1");
    services.attention().init("S1", Some(1000)).unwrap();

    services
        .sessions()
        .log_event("S1", EventType::Decision, json!({ "text": "use rusqlite" }))
        .unwrap();
    let checkpoint = services
        .checkpoints()
        .create_manual(
            "S1",
            "entity layer done",
            &["schema mapped".to_string()],
            &["wire the service".to_string()],
        )
        .unwrap();
    services
        .sessions()
        .log_event("S1", EventType::Decision, json!({ "text": "split the bus" }))
        .unwrap();

    let first = services
        .checkpoints()
        .build_restore_bundle(checkpoint.id)
        .unwrap();
    let second = services
        .checkpoints()
        .build_restore_bundle(checkpoint.id)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    // only events after the checkpoint replay into the bundle
    assert_eq!(first.recent_decisions, vec!["split the bus"]);
    assert_eq!(first.summary, "entity layer done");

    // the latest-bundle path sees the same state
    let recovery = services.attention().build_recovery_context("S1").unwrap();
    assert_eq!(recovery, first);
}

#[test]
fn event_ids_are_monotonic_per_session() {
    let services = services();
    start_session(&services, "S1");
    services.attention().init("S1", Some(1000)).unwrap();
    services.attention().observe("S1", 100, &[], &[]).unwrap();
    services
        .sessions()
        .log_event("S1", EventType::Decision, json!({ "text": "x" }))
        .unwrap();

    let events = services
        .store()
        .read(|conn| queries::event::list_for_session(conn, "S1", None))
        .unwrap();
    assert!(events.len() >= 3);
    for pair in events.windows(2) {
        assert!(pair[1].id > pair[0].id);
    }
}
