//! Integration tests for history persistence, rotation and queries

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::temp_dir;
use gateway::{HistoryLimits, HistoryQuery, HistoryRecord, HistoryStore, SortOrder, TokenCounts};

fn record(question: &str, model: &str) -> HistoryRecord {
    HistoryRecord::success(
        "den",
        question,
        format!("answer to {}", question),
        model,
        TokenCounts {
            prompt: 10,
            completion: 5,
            total: 15,
            estimated: false,
        },
        120,
    )
}

fn limits(max_entries: usize) -> HistoryLimits {
    HistoryLimits {
        max_entries,
        max_bytes: 1024 * 1024,
    }
}

#[test]
fn test_sequences_keep_growing_across_rotation_and_clear() {
    let dir = temp_dir();
    let mut store = HistoryStore::open(dir.path(), "den", limits(2)).unwrap();

    for i in 0..4 {
        let outcome = store.append(record(&format!("q{}", i), "gpt-4o-mini")).unwrap();
        assert_eq!(outcome.sequence, i);
    }
    store.clear().unwrap();
    drop(store);

    let mut store = HistoryStore::open(dir.path(), "den", limits(2)).unwrap();
    assert!(store.is_empty());
    assert_eq!(store.append(record("after", "gpt-4o-mini")).unwrap().sequence, 4);

    let archived: Vec<_> = store.archived_records().unwrap().into_iter().map(|r| r.sequence).collect();
    assert_eq!(archived, vec![0, 1]);
}

#[test]
fn test_rotation_on_lower_limit_evicts_many_at_once() {
    let dir = temp_dir();
    let mut store = HistoryStore::open(dir.path(), "den", limits(10)).unwrap();
    for i in 0..6 {
        store.append(record(&format!("q{}", i), "gpt-4o-mini")).unwrap();
    }

    store.set_limits(limits(2));
    let outcome = store.append(record("q6", "gpt-4o-mini")).unwrap();

    assert_eq!(outcome.evicted, 5);
    assert!(outcome.rotation_error.is_none());
    let kept: Vec<_> = store.snapshot().iter().map(|r| r.question.clone()).collect();
    assert_eq!(kept, vec!["q5", "q6"]);

    // Archives hold at most max_entries records each.
    let archives = store.archives().unwrap();
    assert_eq!(archives.len(), 3);
    assert_eq!(store.archived_records().unwrap().len(), 5);
}

#[test]
fn test_active_file_is_json_with_records() {
    let dir = temp_dir();
    let mut store = HistoryStore::open(dir.path(), "Den Lights", limits(5)).unwrap();
    store.append(record("Are the lights on?", "gpt-4o-mini")).unwrap();

    let path = store.active_path();
    assert_eq!(path.file_name().unwrap(), "den_lights_history.json");

    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(value["records"][0]["question"], "Are the lights on?");
    assert_eq!(value["records"].as_array().unwrap().len(), 1);
    assert!(!dir.path().join("den_lights_history.json.tmp").exists());
}

#[test]
fn test_query_filters_sorts_and_limits() {
    let dir = temp_dir();
    let mut store = HistoryStore::open(dir.path(), "den", limits(50)).unwrap();
    for i in 0..6 {
        let model = if i % 2 == 0 { "gpt-4o-mini" } else { "claude-3-haiku" };
        store.append(record(&format!("q{}", i), model)).unwrap();
    }
    let window = store.snapshot();

    let newest = HistoryQuery {
        limit: 2,
        ..HistoryQuery::new("den")
    }
    .apply(&window);
    let questions: Vec<_> = newest.iter().map(|e| e.question.as_str()).collect();
    assert_eq!(questions, vec!["q5", "q4"]);
    assert!(newest[0].metadata.is_none());

    let oldest_claude = HistoryQuery {
        filter_model: Some("CLAUDE-3-HAIKU".into()),
        sort_order: SortOrder::Oldest,
        include_metadata: true,
        ..HistoryQuery::new("den")
    }
    .apply(&window);
    let questions: Vec<_> = oldest_claude.iter().map(|e| e.question.as_str()).collect();
    assert_eq!(questions, vec!["q1", "q3", "q5"]);
    assert_eq!(oldest_claude[0].metadata.as_ref().unwrap().total_tokens, 15);

    let future = HistoryQuery {
        start_date: Some(Utc::now() + ChronoDuration::hours(1)),
        ..HistoryQuery::new("den")
    }
    .apply(&window);
    assert!(future.is_empty());

    let clamped = HistoryQuery {
        limit: 0,
        ..HistoryQuery::new("den")
    }
    .apply(&window);
    assert_eq!(clamped.len(), 1);
}

#[test]
fn test_model_filter_matches_requested_alias() {
    let dir = temp_dir();
    let mut store = HistoryStore::open(dir.path(), "den", limits(10)).unwrap();
    store
        .append(record("dated", "gpt-4o-mini-2024-07-18").requested("gpt-4o-mini"))
        .unwrap();
    store.append(record("other", "gpt-4o-2024-08-06").requested("gpt-4o")).unwrap();
    drop(store);

    // The requested model survives a reload.
    let store = HistoryStore::open(dir.path(), "den", limits(10)).unwrap();
    let window = store.snapshot();

    let by_alias = HistoryQuery {
        filter_model: Some("gpt-4o-mini".into()),
        ..HistoryQuery::new("den")
    }
    .apply(&window);
    assert_eq!(by_alias.len(), 1);
    assert_eq!(by_alias[0].question, "dated");

    let by_dated_id = HistoryQuery {
        filter_model: Some("GPT-4O-2024-08-06".into()),
        ..HistoryQuery::new("den")
    }
    .apply(&window);
    assert_eq!(by_dated_id.len(), 1);
    assert_eq!(by_dated_id[0].question, "other");
}

#[test]
fn test_failed_records_are_persisted() {
    let dir = temp_dir();
    let mut store = HistoryStore::open(dir.path(), "den", limits(5)).unwrap();
    store
        .append(HistoryRecord::failure("den", "Hello?", "gpt-4o-mini", "Authentication failed: bad key", 30))
        .unwrap();
    drop(store);

    let store = HistoryStore::open(dir.path(), "den", limits(5)).unwrap();
    let records = store.snapshot().to_vec();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].error.as_deref(), Some("Authentication failed: bad key"));
}
