//! Router Integration Tests
//!
//! End-to-end behavior of the assembled [`RouterService`]:
//! - Classification drives selection toward the best worker for the task
//! - Locked and soft preferences
//! - Feedback moves rankings in one direction only
//! - Counters survive concurrent routing
//! - Records and the feedback log survive a restart

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use router_core::persistence::MemoryStore;
use router_core::routing::{FeedbackRequest, RoutingRequest, TaskType};
use router_core::{PerformanceStore, RouterConfig, RouterService};

const WORKERS: [&str; 3] = ["worker-A", "worker-B", "worker-C"];

async fn service() -> RouterService {
    RouterService::start(RouterConfig::in_memory(WORKERS), None)
        .await
        .unwrap()
}

fn position(service: &RouterService, worker: &str, task: TaskType) -> usize {
    service
        .rankings(Some(task))
        .unwrap()
        .iter()
        .position(|r| r.worker_id == worker)
        .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_code_prompt_goes_to_top_ranked_code_worker() {
    let service = service().await;
    for _ in 0..3 {
        service
            .feedback(FeedbackRequest::new("worker-B", 5).with_task_type(TaskType::Code))
            .unwrap();
    }
    let expected = service.rankings(Some(TaskType::Code)).unwrap()[0].worker_id.clone();
    assert_eq!(expected, "worker-B");

    let result = service.route(&RoutingRequest::new("Write a function to reverse a string"));

    assert_eq!(result.task_type, Some(TaskType::Code));
    assert_eq!(result.task_name, "Code Generation");
    assert_eq!(result.worker_id, expected);
    assert_eq!(result.ranked_workers[0].worker_id, expected);
    assert_eq!(result.rank_of_selected, Some(1));
    assert!(!result.user_preference_respected);
    service.shutdown().await;
}

#[tokio::test]
async fn test_locked_preference_wins() {
    let service = RouterService::start(RouterConfig::in_memory(["worker-A", "worker-B"]), None)
        .await
        .unwrap();
    service
        .feedback(FeedbackRequest::new("worker-B", 5).with_task_type(TaskType::Math))
        .unwrap();

    let result = service.route(
        &RoutingRequest::new("Solve the equation x = 2 + 3")
            .with_preference("worker-A")
            .locked(),
    );

    assert_eq!(result.worker_id, "worker-A");
    assert_eq!(result.confidence, 1.0);
    assert!(result.user_preference_respected);
    assert_eq!(result.reason, "locked preference");
    service.shutdown().await;
}

#[tokio::test]
async fn test_empty_prompt_is_general() {
    let service = service().await;
    let result = service.route(&RoutingRequest::new(""));
    assert_eq!(result.task_type, Some(TaskType::General));
    assert_eq!(result.confidence, 0.5);
    service.shutdown().await;
}

#[tokio::test]
async fn test_negative_feedback_counts_request_only() {
    let service = service().await;
    service.route(&RoutingRequest::new("hello").with_preference("worker-A").locked());
    let before = service.tracker().get("worker-A").unwrap();

    service
        .feedback(FeedbackRequest::new("worker-A", 2).with_exchange("hello", "hi"))
        .unwrap();

    let after = service.tracker().get("worker-A").unwrap();
    assert_eq!(after.total_requests, before.total_requests + 1);
    assert_eq!(after.successful_responses, before.successful_responses);
    assert_eq!(after.task_success, before.task_success);
    service.shutdown().await;
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_locked_preference_for_every_worker() {
    let service = service().await;
    let prompts = ["", "Write a poem", "Why is the sky blue?", "Translate this to French"];

    for worker in WORKERS {
        for prompt in prompts {
            let result = service.route(&RoutingRequest::new(prompt).with_preference(worker).locked());
            assert_eq!(result.worker_id, worker);
            assert_eq!(result.confidence, 1.0);
        }
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_unlocked_selection_is_top_ranked() {
    let service = service().await;
    service
        .feedback(FeedbackRequest::new("worker-C", 5).with_task_type(TaskType::Creative))
        .unwrap();
    service
        .feedback(FeedbackRequest::new("worker-A", 4).with_task_type(TaskType::Reasoning))
        .unwrap();

    for prompt in ["Write a story about a dragon", "Why do cats purr?", "Summarize this article", ""] {
        let result = service.route(&RoutingRequest::new(prompt));
        assert_eq!(result.worker_id, result.ranked_workers[0].worker_id, "prompt: {prompt}");
        assert_eq!(result.total_ranked, Some(WORKERS.len()));
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_soft_preference_suggests_top_worker() {
    let service = service().await;
    for _ in 0..2 {
        service
            .feedback(FeedbackRequest::new("worker-C", 5).with_task_type(TaskType::Creative))
            .unwrap();
    }

    let result = service.route(&RoutingRequest::new("Write a poem about autumn").with_preference("worker-A"));

    assert_eq!(result.worker_id, "worker-A");
    assert_eq!(result.confidence, 0.9);
    assert!(result.user_preference_respected);
    assert_eq!(result.suggested_worker.as_deref(), Some("worker-C"));
    let comparison = result.performance_comparison.unwrap();
    assert_eq!(comparison.best_worker, "worker-C");
    service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_preference_ignored() {
    let service = service().await;
    let result = service.route(&RoutingRequest::new("Write a poem").with_preference("ghost").locked());
    assert_ne!(result.worker_id, "ghost");
    assert!(!result.user_preference_respected);
    service.shutdown().await;
}

#[tokio::test]
async fn test_positive_feedback_never_lowers_rank() {
    let service = service().await;
    let mut last = position(&service, "worker-C", TaskType::Math);

    for _ in 0..5 {
        service
            .feedback(FeedbackRequest::new("worker-C", 5).with_task_type(TaskType::Math))
            .unwrap();
        let now = position(&service, "worker-C", TaskType::Math);
        assert!(now <= last);
        last = now;
    }
    assert_eq!(last, 0);
    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_feedback_changes_nothing() {
    let service = service().await;
    assert!(service.feedback(FeedbackRequest::new("worker-A", 0)).is_err());
    assert!(service.feedback(FeedbackRequest::new("worker-A", 6)).is_err());

    let mut bad_task = FeedbackRequest::new("worker-A", 5);
    bad_task.task_type = Some("astrology".into());
    assert!(service.feedback(bad_task).is_err());

    assert!(service.tracker().get("worker-A").is_none());
    assert_eq!(service.recorder().audit_len(), 0);
    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_routing_and_feedback() {
    let service = Arc::new(service().await);

    let routes = (0..200).map(|i| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let prompt = if i % 2 == 0 { "Write a function" } else { "Solve 3 * 7" };
            service.route(&RoutingRequest::new(prompt));
        })
    });
    let ratings = (0..100).map(|i| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let worker = WORKERS[i % WORKERS.len()];
            service
                .feedback(FeedbackRequest::new(worker, 5).with_task_type(TaskType::Code))
                .unwrap();
        })
    });

    for outcome in join_all(routes.chain(ratings).collect::<Vec<_>>()).await {
        outcome.unwrap();
    }

    let snapshot = service.tracker().snapshot();
    let total: u64 = snapshot.iter().map(|r| r.record.total_requests).sum();
    let successes: u64 = snapshot.iter().map(|r| r.record.successful_responses).sum();
    assert_eq!(total, 300);
    assert_eq!(successes, 300);
    assert_eq!(service.recorder().audit_len(), 100);
    service.shutdown().await;
}

// =============================================================================
// Persistence
// =============================================================================

fn file_config(dir: &TempDir) -> RouterConfig {
    let mut config = RouterConfig::in_memory(WORKERS);
    config.persistence_enabled = true;
    config.state_path = dir.path().join("state").join("records.json");
    config.feedback_path = dir.path().join("state").join("feedback.jsonl");
    config.flush_interval = Duration::from_millis(20);
    config
}

#[tokio::test]
async fn test_records_reload_from_json_files() {
    let dir = TempDir::new().unwrap();

    let service = RouterService::start(file_config(&dir), None).await.unwrap();
    service.route(&RoutingRequest::new("Write a function").with_preference("worker-B").locked());
    service
        .feedback(
            FeedbackRequest::new("worker-B", 5)
                .with_exchange("Write a function", "fn f() {}")
                .with_task_type(TaskType::Code),
        )
        .unwrap();
    service.feedback(FeedbackRequest::new("worker-C", 1)).unwrap();
    service.shutdown().await;

    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("state/records.json")).unwrap())
            .unwrap();
    assert_eq!(state["version"], 1);
    assert_eq!(state["workers"].as_array().unwrap().len(), 2);

    let log = std::fs::read_to_string(dir.path().join("state/feedback.jsonl")).unwrap();
    let rows: Vec<serde_json::Value> = log
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["worker_id"], "worker-B");
    assert_eq!(rows[0]["rating"], 5);
    assert_eq!(rows[1]["worker_id"], "worker-C");

    let restarted = RouterService::start(file_config(&dir), None).await.unwrap();
    let b = restarted.tracker().get("worker-B").unwrap();
    assert_eq!(b.total_requests, 2);
    assert_eq!(b.successful_responses, 2);
    assert_eq!(b.task_success.get(&TaskType::Code), Some(&2));
    let c = restarted.tracker().get("worker-C").unwrap();
    assert_eq!(c.total_requests, 1);
    assert_eq!(c.successful_responses, 0);

    let result = restarted.route(&RoutingRequest::new("Write a function"));
    assert_eq!(result.worker_id, "worker-B");
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_state_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    std::fs::create_dir_all(config.state_path.parent().unwrap()).unwrap();
    std::fs::write(&config.state_path, b"{ not json").unwrap();

    let service = RouterService::start(config, None).await.unwrap();
    assert!(service.tracker().snapshot().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn test_store_sees_final_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let service = RouterService::start(RouterConfig::in_memory(WORKERS), Some(store.clone()))
        .await
        .unwrap();

    for _ in 0..10 {
        service.route(&RoutingRequest::new("Explain why the sky is blue"));
    }
    service.shutdown().await;

    let saved = store.load_records().await.unwrap();
    let total: u64 = saved.iter().map(|r| r.record.total_requests).sum();
    assert_eq!(total, 10);
}
