// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Periodic restarts: fixed-delay timing, cancellation and removal.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use gns_task::{ProtocolExecutor, ProtocolTask, TaskOutcome};
use gns_testing::{
    messenger::RecordingMessenger,
    node_types::{TestEventType, TestMessage, TestTypes},
    task_helpers::{test_config, wait_until, Invocation, ProbeAction, ProbeLog, ProbeTask},
};
use gns_types::{logging::setup_logging, ProtocolEvent};
use tokio::time::sleep;

fn executor() -> ProtocolExecutor<TestTypes> {
    setup_logging();
    ProtocolExecutor::<TestTypes>::new(RecordingMessenger::<TestTypes>::new(0), test_config())
}

/// Counts starts; has no restart of its own
struct StartCounter {
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl ProtocolTask<TestTypes> for StartCounter {
    fn key(&self) -> String {
        "counter".to_string()
    }

    fn refresh_key(&mut self) -> String {
        "counter'".to_string()
    }

    fn event_types(&self) -> HashSet<TestEventType> {
        HashSet::new()
    }

    async fn start(&mut self) -> Result<TaskOutcome<TestTypes>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutcome::none())
    }

    async fn handle_event(&mut self, _: &ProtocolEvent<TestTypes>) -> Result<TaskOutcome<TestTypes>> {
        Ok(TaskOutcome::none())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_task_is_restarted_periodically() {
    let executor = executor();
    let log = ProbeLog::new();
    let key = executor
        .schedule(ProbeTask::new("ticker", Arc::clone(&log)), Duration::from_millis(50))
        .unwrap();
    assert!(executor.task_info(&key).unwrap().scheduled);

    sleep(Duration::from_millis(320)).await;

    let calls = log.calls();
    assert_eq!(calls[0], Invocation::Start);
    assert_eq!(log.count(Invocation::Start), 1);
    let restarts = log.count(Invocation::Restart);
    assert!((3..=7).contains(&restarts), "{restarts} restarts");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_task_is_never_invoked_again() {
    let executor = executor();
    let log = ProbeLog::new();
    let period = Duration::from_millis(50);
    let key = executor
        .schedule(
            ProbeTask::new("one-shot", Arc::clone(&log)).on_restart(ProbeAction::Cancel),
            period,
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || !executor.is_running(&key)).await);
    let invocations = log.calls().len();
    sleep(period * 2 + Duration::from_millis(20)).await;

    assert_eq!(log.calls().len(), invocations);
    assert_eq!(log.calls(), vec![Invocation::Start, Invocation::Restart]);
    assert_eq!(executor.size(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_task_timer_is_cancelled() {
    let executor = executor();
    let log = ProbeLog::new();
    let key = executor
        .schedule(ProbeTask::new("doomed", Arc::clone(&log)), Duration::from_millis(30))
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || log.count(Invocation::Restart) >= 1).await);

    assert!(executor.remove(&key));
    let invocations = log.calls().len();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(log.calls().len(), invocations);
    assert!(!executor.remove(&key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restarts_do_not_count_as_activity() {
    let executor = executor();
    let log = ProbeLog::new();
    let key = executor
        .schedule(ProbeTask::new("quiet", Arc::clone(&log)), Duration::from_millis(20))
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || log.count(Invocation::Restart) >= 3).await);

    let info = executor.task_info(&key).unwrap();
    assert!(info.idle >= info.age);

    let poke = ProtocolEvent::from_message(
        1,
        TestMessage::keyed(TestEventType::Response, key.as_str(), 0, "poke"),
    );
    assert!(executor.handle_event(&poke).await);
    let info = executor.task_info(&key).unwrap();
    assert!(info.idle < info.age);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_restarts_never_overlap() {
    let executor = executor();
    let log = ProbeLog::new();
    let key = executor
        .schedule(
            ProbeTask::new("slow", Arc::clone(&log)).working(Duration::from_millis(40)),
            Duration::from_millis(10),
        )
        .unwrap();

    for from in 0..5 {
        let event = ProtocolEvent::from_message(
            from,
            TestMessage::keyed(TestEventType::Response, key.as_str(), 0, "poke"),
        );
        let executor = executor.clone();
        tokio::spawn(async move { executor.handle_event(&event).await });
    }
    sleep(Duration::from_millis(600)).await;

    assert!(log.count(Invocation::Restart) >= 2);
    assert_eq!(log.count(Invocation::Event), 5);
    assert_eq!(log.overlaps(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_falls_back_to_start() {
    let executor = executor();
    let starts = Arc::new(AtomicUsize::new(0));
    executor
        .schedule(
            StartCounter {
                starts: Arc::clone(&starts),
            },
            Duration::from_millis(20),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || starts.load(Ordering::SeqCst) >= 3).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_schedules_tasks_with_a_period() {
    let executor = executor();
    let log = ProbeLog::new();
    let key = executor
        .spawn(ProbeTask::new("periodic", Arc::clone(&log)).every(Duration::from_millis(20)))
        .unwrap();

    assert!(executor.task_info(&key).unwrap().scheduled);
    assert!(wait_until(Duration::from_secs(1), || log.count(Invocation::Restart) >= 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_default_uses_configured_period() {
    let executor = executor();
    let log = ProbeLog::new();
    let key = executor
        .schedule_default(ProbeTask::new("defaulted", Arc::clone(&log)))
        .unwrap();
    assert!(executor.task_info(&key).unwrap().scheduled);

    // test_config restarts every 100ms
    sleep(Duration::from_millis(50)).await;
    assert_eq!(log.count(Invocation::Restart), 0);
    assert!(wait_until(Duration::from_secs(1), || log.count(Invocation::Restart) >= 1).await);
}
