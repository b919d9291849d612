use chrono::{DateTime, Duration, TimeZone, Utc};
use qmon_core::{
    day_key, keys, CollectingSink, ControlCommand, HistoryEvent, KvStore, MemoryStore,
    MonitorConfig, MonitorEngine, ProhibitedKind, SectionKey, StatusKey,
};
use qmon_protocol::{parse_batch, AgentSnapshot, ReportedDuration, SnapshotBatch};
use std::path::PathBuf;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn at_secs(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

fn at_ms(ms: i64) -> DateTime<Utc> {
    t0() + Duration::milliseconds(ms)
}

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/rosters")
        .join(name)
}

fn engine() -> MonitorEngine<MemoryStore> {
    MonitorEngine::new(MonitorConfig::default(), MemoryStore::new(), t0())
}

fn queued(name: &str) -> AgentSnapshot {
    AgentSnapshot {
        raw_label: "Disponible".to_string(),
        on_queue_flag: true,
        ..AgentSnapshot::named(name)
    }
}

fn on_call(name: &str) -> AgentSnapshot {
    AgentSnapshot {
        raw_label: "Interaction".to_string(),
        on_queue_flag: true,
        interaction_count: 1,
        is_voice_flag: true,
        ..AgentSnapshot::named(name)
    }
}

fn labelled(name: &str, label: &str) -> AgentSnapshot {
    AgentSnapshot {
        raw_label: label.to_string(),
        ..AgentSnapshot::named(name)
    }
}

fn roster(agents: Vec<AgentSnapshot>) -> SnapshotBatch {
    SnapshotBatch::new(agents)
}

fn kinds(engine: &MonitorEngine<MemoryStore>, name: &str) -> Vec<&'static str> {
    engine
        .state()
        .ledger
        .events(&day_key(t0()), name)
        .iter()
        .map(|entry| entry.event.kind())
        .collect()
}

#[test]
fn test_stable_queued_agent_records_one_status_event() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();

    for poll in 0..3 {
        let report = engine
            .run_cycle(&roster(vec![queued("Dupont")]), at_ms(poll * 1_500), &mut sink)
            .unwrap();
        assert_eq!(report.processed, 1);
    }

    assert_eq!(engine.state().timers.status_key("Dupont"), Some(StatusKey::QueuedIdle));
    assert_eq!(
        engine.state().timers.status_elapsed_ms("Dupont", at_ms(3_000)),
        Some(3_000)
    );
    assert_eq!(kinds(&engine, "Dupont"), vec!["status"]);
    assert_eq!(engine.view().names_in(SectionKey::QueuedIdle), vec!["Dupont"]);
    assert!(sink.notifications.is_empty());
}

#[test]
fn test_long_call_alerts_once_then_closes_after_debounce() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();

    for secs in (0..=690).step_by(30) {
        engine
            .run_cycle(
                &roster(vec![on_call("Martin"), queued("Dupont")]),
                at_secs(secs),
                &mut sink,
            )
            .unwrap();
    }
    assert_eq!(sink.notifications.len(), 1);
    assert_eq!(sink.notifications[0].title, "Appel long");
    assert_eq!(sink.notifications[0].body, "Martin 📞 00:10:00");
    assert_eq!(engine.state().slots.slot_of("Martin"), Some(1));

    let ended = roster(vec![queued("Martin"), queued("Dupont")]);
    let mut closed = 0;
    for ms in [720_000, 721_500, 723_000] {
        closed += engine.run_cycle(&ended, at_ms(ms), &mut sink).unwrap().closed_intervals;
    }

    assert_eq!(closed, 1);
    let call_ms = engine.state().ledger.aggregate(&day_key(t0()), "Martin").call_ms;
    assert!((720_000..=725_000).contains(&call_ms), "call_ms = {}", call_ms);
    assert_eq!(
        kinds(&engine, "Martin").iter().filter(|kind| **kind == "call_end").count(),
        1
    );
    assert_eq!(engine.state().slots.slot_of("Dupont"), Some(1));
    assert_eq!(engine.state().slots.slot_of("Martin"), Some(2));
    assert_eq!(engine.state().slots.get("Martin").map(|e| e.total_calls), Some(1));
    assert_eq!(sink.notifications.len(), 1);
}

#[test]
fn test_brief_voice_dropout_keeps_call_open() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();

    engine.run_cycle(&roster(vec![on_call("A")]), at_secs(0), &mut sink).unwrap();
    engine.run_cycle(&roster(vec![queued("A")]), at_secs(2), &mut sink).unwrap();
    engine.run_cycle(&roster(vec![queued("A")]), at_secs(4), &mut sink).unwrap();
    engine.run_cycle(&roster(vec![on_call("A")]), at_secs(6), &mut sink).unwrap();

    assert_eq!(engine.state().timers.call_elapsed_ms("A", at_secs(6)), Some(6_000));
    assert!(!kinds(&engine, "A").contains(&"call_end"));
    assert_eq!(engine.state().ledger.aggregate(&day_key(t0()), "A").call_ms, 0);
}

#[test]
fn test_reported_duration_corrects_drift_beyond_tolerance_only() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    let on_break = |reported: Option<u64>| {
        roster(vec![AgentSnapshot {
            reported_duration_sec: reported.map(ReportedDuration::Seconds),
            ..labelled("A", "Pause")
        }])
    };

    engine.run_cycle(&on_break(None), at_secs(0), &mut sink).unwrap();
    engine.run_cycle(&on_break(Some(62)), at_secs(60), &mut sink).unwrap();
    assert_eq!(engine.state().timers.status_elapsed_ms("A", at_secs(60)), Some(60_000));

    engine.run_cycle(&on_break(Some(200)), at_secs(120), &mut sink).unwrap();
    assert_eq!(engine.state().timers.status_elapsed_ms("A", at_secs(120)), Some(200_000));
    assert_eq!(engine.state().timers.status_key("A"), Some(StatusKey::Break));
}

#[test]
fn test_interval_longer_than_cap_is_clamped() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();

    engine.run_cycle(&roster(vec![on_call("A")]), t0(), &mut sink).unwrap();
    let later = t0() + Duration::hours(10);
    for secs in 0..3 {
        engine
            .run_cycle(&roster(vec![queued("A")]), later + Duration::seconds(secs), &mut sink)
            .unwrap();
    }

    let aggregate = engine.state().ledger.aggregate(&day_key(t0()), "A");
    assert_eq!(aggregate.call_ms, 8 * 60 * 60 * 1000);
    let events = engine.state().ledger.events(&day_key(t0()), "A");
    let last = events.last().map(|entry| &entry.event);
    assert_eq!(last, Some(&HistoryEvent::CallEnd { dur_ms: 28_800_000 }));
}

#[test]
fn test_history_ring_keeps_latest_entries() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();

    for poll in 0..250 {
        let label = if poll % 2 == 0 { "Pause" } else { "Repas" };
        engine
            .run_cycle(&roster(vec![labelled("A", label)]), at_secs(poll), &mut sink)
            .unwrap();
    }

    let events = engine.state().ledger.events(&day_key(t0()), "A");
    assert_eq!(events.len(), 200);
    assert_eq!(events[0].ts, at_secs(50));
    assert_eq!(
        events[199].event,
        HistoryEvent::Status {
            from: Some(StatusKey::Break),
            to: StatusKey::Meal,
            prev_ms: Some(1_000),
        }
    );
}

#[test]
fn test_alerts_fire_once_per_episode() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();

    let run = |engine: &mut MonitorEngine<MemoryStore>,
               sink: &mut CollectingSink,
               batch: &SnapshotBatch,
               range: std::ops::RangeInclusive<i64>| {
        for secs in range.step_by(50) {
            engine.run_cycle(batch, at_secs(secs), sink).unwrap();
        }
    };

    run(&mut engine, &mut sink, &roster(vec![on_call("A")]), 0..=650);
    run(&mut engine, &mut sink, &roster(vec![queued("A")]), 700..=800);
    assert_eq!(sink.notifications.len(), 1);

    run(&mut engine, &mut sink, &roster(vec![on_call("A")]), 850..=1_500);
    assert_eq!(sink.notifications.len(), 2);
    assert!(sink.notifications.iter().all(|n| n.title == "Appel long"));
    assert_eq!(sink.cues.len(), 2);
    assert!(sink.cues.iter().all(|cue| cue.frequency == 880));
}

#[test]
fn test_muted_alert_is_not_replayed_on_unmute() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    let rona = roster(vec![labelled("A", "Sans réponse")]);

    engine.apply_command(ControlCommand::Mute, t0()).unwrap();
    let report = engine.run_cycle(&rona, at_secs(0), &mut sink).unwrap();
    assert_eq!(report.alerts_active, 1);
    assert_eq!(report.alerts_fired, 0);
    assert!(engine.view().section(SectionKey::Prohibited).is_some_and(|s| s.count == 1));

    engine.apply_command(ControlCommand::Unmute, at_secs(1)).unwrap();
    engine.run_cycle(&rona, at_secs(2), &mut sink).unwrap();
    assert!(sink.notifications.is_empty());

    engine.run_cycle(&roster(vec![queued("A")]), at_secs(4), &mut sink).unwrap();
    engine.run_cycle(&rona, at_secs(6), &mut sink).unwrap();
    assert_eq!(sink.notifications.len(), 1);
    assert_eq!(sink.notifications[0].body, "A en RONA");

    let day = day_key(t0());
    assert_eq!(engine.state().ledger.aggregate(&day, "A").rona_ms, 4_000);
}

#[test]
fn test_reset_clears_store_and_state() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    for secs in 0..3 {
        engine
            .run_cycle(&roster(vec![on_call("A"), queued("B")]), at_secs(secs), &mut sink)
            .unwrap();
    }
    assert!(!engine.store().is_empty());

    engine.apply_command(ControlCommand::Reset, at_secs(5)).unwrap();

    assert!(engine.store().is_empty());
    assert!(engine.state().slots.is_empty());
    assert!(engine.state().timers.calls.is_empty());
    assert!(engine.view().sections.iter().all(|section| section.count == 0));

    let reloaded = MonitorEngine::new(MonitorConfig::default(), engine.store().clone(), at_secs(6));
    assert!(reloaded.state().slots.is_empty());
    assert!(reloaded.load_report().is_clean());
}

#[test]
fn test_malformed_persisted_key_falls_back_to_default() {
    let mut store = MemoryStore::new();
    store.set(keys::SLOT_ROSTER, "{oops").unwrap();
    store.set(keys::FAVORITES, r#"["Dupont"]"#).unwrap();

    let mut engine = MonitorEngine::new(MonitorConfig::default(), store, t0());
    assert_eq!(engine.load_report().malformed, vec![keys::SLOT_ROSTER.to_string()]);
    assert!(engine.state().favorites.contains("Dupont"));

    let mut sink = CollectingSink::default();
    engine.run_cycle(&roster(vec![queued("Dupont")]), t0(), &mut sink).unwrap();
    assert_eq!(engine.state().slots.slot_of("Dupont"), Some(1));
    assert_eq!(engine.view().names_in(SectionKey::Favorites), vec!["Dupont"]);
}

#[test]
fn test_occupied_wins_over_voice_signal() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    let busy = AgentSnapshot {
        is_busy_flag: true,
        ..on_call("A")
    };

    engine.run_cycle(&roster(vec![busy]), t0(), &mut sink).unwrap();

    assert_eq!(engine.state().timers.status_key("A"), Some(StatusKey::Occupied));
    assert!(engine.state().timers.calls.is_empty());
    assert_eq!(engine.view().names_in(SectionKey::Occupied), vec!["A"]);
    assert_eq!(engine.view().kpis.longest_call, None);
    assert_eq!(engine.view().kpis.occupied, 1);
}

#[test]
fn test_bad_agent_row_does_not_block_others() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    let batch = roster(vec![AgentSnapshot::named("x".repeat(300)), queued("Dupont")]);

    let report = engine.run_cycle(&batch, t0(), &mut sink).unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(engine.state().connected, vec!["Dupont".to_string()]);
}

#[test]
fn test_state_survives_restart() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    for secs in [0, 30, 60] {
        engine
            .run_cycle(&roster(vec![queued("B"), on_call("A")]), at_secs(secs), &mut sink)
            .unwrap();
    }

    let store = engine.store().clone();
    let mut restarted = MonitorEngine::new(MonitorConfig::default(), store, at_secs(90));
    assert!(restarted.load_report().is_clean());
    restarted
        .run_cycle(&roster(vec![queued("B"), on_call("A")]), at_secs(90), &mut sink)
        .unwrap();

    assert_eq!(restarted.state().timers.call_elapsed_ms("A", at_secs(90)), Some(90_000));
    assert_eq!(restarted.state().slots.slot_of("B"), Some(1));
    assert_eq!(restarted.state().slots.slot_of("A"), Some(2));
    assert_eq!(kinds(&restarted, "A"), vec!["status"]);
}

#[test]
fn test_second_chat_closes_independently() {
    let mut engine = engine();
    let mut sink = CollectingSink::default();
    let chatting = |count: u8| {
        roster(vec![AgentSnapshot {
            raw_label: "Chat".to_string(),
            chat_count: count,
            ..AgentSnapshot::named("A")
        }])
    };

    engine.run_cycle(&chatting(2), at_secs(0), &mut sink).unwrap();
    for secs in [10, 11, 12] {
        engine.run_cycle(&chatting(1), at_secs(secs), &mut sink).unwrap();
    }

    let chats = engine.state().timers.chat_elapsed_ms("A", at_secs(12));
    assert_eq!(chats, [Some(12_000), None]);
    let day = day_key(t0());
    assert_eq!(engine.state().ledger.aggregate(&day, "A").chat_ms, 12_000);
    assert_eq!(
        engine.state().ledger.events(&day, "A").last().map(|e| &e.event),
        Some(&HistoryEvent::ChatEnd {
            slot: 1,
            dur_ms: 12_000
        })
    );
}

#[test]
fn test_fixture_roster_groups_agents() {
    let bytes = std::fs::read(fixture_path("morning.json")).unwrap();
    let batch = parse_batch(&bytes).unwrap();
    let now = batch.captured_at_utc().unwrap();

    let mut engine = MonitorEngine::new(MonitorConfig::default(), MemoryStore::new(), now);
    let mut sink = CollectingSink::default();
    let report = engine.run_cycle(&batch, now, &mut sink).unwrap();

    assert_eq!(report.processed, 5);
    assert_eq!(report.offline, 1);
    assert_eq!(report.duplicates, 1);

    let view = engine.view();
    assert_eq!(view.names_in(SectionKey::QueuedIdle), vec!["Jean Dupont"]);
    assert_eq!(view.names_in(SectionKey::Call), vec!["Claire Martin"]);
    assert_eq!(view.names_in(SectionKey::Chat), vec!["Hélène Roux"]);
    assert_eq!(view.names_in(SectionKey::Prohibited), vec!["Paul Girard"]);
    assert_eq!(view.names_in(SectionKey::Break), vec!["Luc Bernard"]);

    let prohibited = &view.section(SectionKey::Prohibited).unwrap().agents[0];
    assert_eq!(prohibited.prohibited, Some(ProhibitedKind::Rona));
    let call = &view.section(SectionKey::Call).unwrap().agents[0];
    assert_eq!(call.status_ms, Some(850_000));
    assert_eq!(call.call_ms, Some(150_000));
    let chat = &view.section(SectionKey::Chat).unwrap().agents[0];
    assert_eq!(chat.chat_ms, vec![Some(95_000), Some(40_000)]);

    assert_eq!(view.kpis.connected, 5);
    assert_eq!(view.kpis.on_queue, 3);
    assert_eq!(view.kpis.prohibited, 1);
    assert_eq!(view.kpis.longest_call.as_ref().map(|l| l.ms), Some(150_000));
    assert_eq!(
        view.kpis.longest_chat.as_ref().map(|l| l.name.as_str()),
        Some("Hélène Roux")
    );

    assert_eq!(sink.notifications.len(), 1);
    assert_eq!(sink.notifications[0].title, "Statut prohibé");
}
