// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Default handler table: precedence over keyed tasks, replacement,
//! unregistering and reply routing.

use std::{sync::Arc, time::Duration};

use gns_task::ProtocolExecutor;
use gns_testing::{
    messenger::RecordingMessenger,
    node_types::{TestEventType, TestMessage, TestTypes},
    task_helpers::{test_config, wait_until, Invocation, ProbeAction, ProbeLog, ProbeTask},
};
use gns_types::{logging::setup_logging, Messenger, ProtocolEvent};

fn executor() -> (ProtocolExecutor<TestTypes>, Arc<RecordingMessenger<TestTypes>>) {
    setup_logging();
    let messenger = RecordingMessenger::<TestTypes>::new(0);
    let executor = ProtocolExecutor::<TestTypes>::new(
        Arc::clone(&messenger) as Arc<dyn Messenger<TestTypes>>,
        test_config(),
    );
    (executor, messenger)
}

fn event(event_type: TestEventType, key: Option<&str>, from: u64) -> ProtocolEvent<TestTypes> {
    let msg = match key {
        Some(key) => TestMessage::keyed(event_type, key, 0, "payload"),
        None => TestMessage::new(event_type, 0, "payload"),
    };
    ProtocolEvent::from_message(from, msg)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_handler_wins_over_keyed_task() {
    let (executor, _messenger) = executor();
    let keyed_log = ProbeLog::new();
    let default_log = ProbeLog::new();
    let key = executor
        .spawn(ProbeTask::new("shared", Arc::clone(&keyed_log)))
        .unwrap();
    executor.register(
        TestEventType::Request,
        ProbeTask::new("handler", Arc::clone(&default_log)),
    );
    assert!(wait_until(Duration::from_secs(1), || keyed_log.count(Invocation::Start) == 1).await);

    assert!(executor.handle_event(&event(TestEventType::Request, Some(&key), 1)).await);
    assert_eq!(default_log.count(Invocation::Event), 1);
    assert_eq!(keyed_log.count(Invocation::Event), 0);

    assert!(executor.handle_event(&event(TestEventType::Response, Some(&key), 1)).await);
    assert_eq!(default_log.count(Invocation::Event), 1);
    assert_eq!(keyed_log.count(Invocation::Event), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latest_registration_replaces_previous() {
    let (executor, _messenger) = executor();
    let old_log = ProbeLog::new();
    let new_log = ProbeLog::new();
    executor.register(TestEventType::Request, ProbeTask::new("old", Arc::clone(&old_log)));
    executor.register(TestEventType::Request, ProbeTask::new("new", Arc::clone(&new_log)));

    for from in 0..3 {
        assert!(executor.handle_event(&event(TestEventType::Request, None, from)).await);
    }
    assert_eq!(old_log.count(Invocation::Event), 0);
    assert_eq!(new_log.count(Invocation::Event), 3);
    // default handlers are never started
    assert_eq!(new_log.count(Invocation::Start), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregister_matches_the_key() {
    let (executor, _messenger) = executor();
    executor.register(TestEventType::Request, ProbeTask::new("handler", ProbeLog::new()));

    assert!(!executor.unregister(TestEventType::Request, &"impostor".to_string()));
    assert!(!executor.unregister(TestEventType::Response, &"handler".to_string()));
    assert!(executor.has_default(&TestEventType::Request));

    assert!(executor.unregister(TestEventType::Request, &"handler".to_string()));
    assert!(!executor.has_default(&TestEventType::Request));
    assert!(!executor.handle_event(&event(TestEventType::Request, None, 1)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_task_covers_its_event_types() {
    let (executor, _messenger) = executor();
    let log = ProbeLog::new();
    executor.register_task(
        ProbeTask::new("replica", Arc::clone(&log))
            .listening([TestEventType::StopEpoch, TestEventType::StartEpoch]),
    );

    assert!(executor.handle_event(&event(TestEventType::StopEpoch, None, 1)).await);
    assert!(executor.handle_event(&event(TestEventType::StartEpoch, None, 1)).await);
    assert!(!executor.handle_event(&event(TestEventType::Request, None, 1)).await);
    // one shared instance behind both types
    assert_eq!(log.count(Invocation::Event), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_reply_is_routed_back_with_the_request_key() {
    let (executor, messenger) = executor();
    executor.register(
        TestEventType::Request,
        ProbeTask::new("responder", ProbeLog::new()).on_event(ProbeAction::Reply),
    );

    assert!(executor.handle_event(&event(TestEventType::Request, Some("req-1"), 4)).await);

    let sent = messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec![4]);
    assert_eq!(sent[0].msgs[0].event_type, TestEventType::Response);
    assert_eq!(sent[0].msgs[0].key.as_deref(), Some("req-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_default_handler_stays_registered() {
    let (executor, _messenger) = executor();
    let log = ProbeLog::new();
    executor.register(
        TestEventType::Request,
        ProbeTask::new("flaky", Arc::clone(&log)).on_event(ProbeAction::Fail),
    );

    assert!(executor.handle_event(&event(TestEventType::Request, None, 1)).await);
    assert!(executor.handle_event(&event(TestEventType::Request, None, 2)).await);
    assert_eq!(log.count(Invocation::Event), 2);
    assert!(executor.has_default(&TestEventType::Request));
    assert!(executor.is_empty());
}

#[test]
fn default_handlers_work_outside_a_runtime() {
    setup_logging();
    let messenger = RecordingMessenger::<TestTypes>::new(0);
    let executor = ProtocolExecutor::<TestTypes>::new(
        Arc::clone(&messenger) as Arc<dyn Messenger<TestTypes>>,
        test_config(),
    );
    executor.register(
        TestEventType::Request,
        ProbeTask::new("responder", ProbeLog::new()).on_event(ProbeAction::Reply),
    );

    let handled = futures::executor::block_on(
        executor.handle_event(&event(TestEventType::Request, Some("req-2"), 6)),
    );

    assert!(handled);
    assert_eq!(messenger.sent_count(), 1);
}
