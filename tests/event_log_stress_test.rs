//! Stress tests for the visitor event log
//!
//! These tests ensure concurrent appends never lose, fuse or truncate rows,
//! including when the field values are crafted to look like row boundaries.

use chrono::Utc;
use footfall::analytics::{GeoFacts, VisitorEvent};
use footfall::storage::{decode_event, CsvEventLog, EventStore};
use std::collections::HashSet;
use std::sync::Arc;

fn event_for(task: usize, seq: usize) -> VisitorEvent {
    VisitorEvent::new(
        Utc::now(),
        format!("10.0.{task}.{seq}"),
        GeoFacts {
            city: "Comma, City".to_string(),
            region: "Quote \"Region\"".to_string(),
            country: "New\nLine".to_string(),
        },
        "GET",
        format!("/task/{task}/seq/{seq}?q=a,b"),
        Some("stress\"agent\"\r\n"),
        seq % 7 == 0,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_appends_produce_complete_rows() {
    const TASKS: usize = 16;
    const PER_TASK: usize = 250;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("visitors.csv");
    let log = Arc::new(CsvEventLog::open(&path).await.unwrap());

    let mut handles = vec![];
    for task in 0..TASKS {
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            for seq in 0..PER_TASK {
                log.append(&event_for(task, seq)).await.unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(log.rows_written(), (TASKS * PER_TASK) as u64);

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(contents.ends_with('\n'));

    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), TASKS * PER_TASK, "Should have exactly T×K rows");

    let mut seen = HashSet::new();
    for line in lines {
        let event = decode_event(line).unwrap_or_else(|e| panic!("row {line:?} failed: {e}"));
        assert_eq!(event.city, "Comma, City");
        assert_eq!(event.region, "Quote \"Region\"");
        assert_eq!(event.country, "New\nLine");
        assert_eq!(event.user_agent, "stress\"agent\"\r\n");
        assert!(seen.insert(event.path.clone()), "duplicate row for {}", event.path);
    }

    assert_eq!(seen.len(), TASKS * PER_TASK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rows_from_one_task_keep_their_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ordered.csv");
    let log = Arc::new(CsvEventLog::open(&path).await.unwrap());

    let noise = {
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            for seq in 0..200 {
                log.append(&event_for(99, seq)).await.unwrap();
            }
        })
    };

    for seq in 0..200 {
        log.append(&event_for(1, seq)).await.unwrap();
    }
    noise.await.unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let ordered: Vec<String> = contents
        .lines()
        .map(|line| decode_event(line).unwrap())
        .filter(|event| event.path.starts_with("/task/1/"))
        .map(|event| event.path)
        .collect();

    let expected: Vec<String> = (0..200).map(|seq| format!("/task/1/seq/{seq}?q=a,b")).collect();
    assert_eq!(ordered, expected);
}
