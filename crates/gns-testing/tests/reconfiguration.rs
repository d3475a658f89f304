// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Two chained quorum steps over a lossy in-memory network: stop the current
//! epoch on every replica, then start the next one on a majority.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use gns_task::{ProtocolExecutor, ProtocolTask, QuorumTask, TaskOutcome, ThresholdHandler};
use gns_testing::{
    memory_network::MemoryNetwork,
    node_types::{TestEventType, TestMessage, TestNodeId, TestTypes},
    reliability::{DropFirst, NetworkReliability, SeededLossyNetwork},
    task_helpers::{test_config, wait_until},
};
use gns_types::{logging::setup_logging, MessagingTask, ProtocolEvent};

/// coordinator node
const COORDINATOR: TestNodeId = 0;
/// replica nodes
const REPLICAS: [TestNodeId; 3] = [1, 2, 3];
/// retransmission period of both steps
const RETRY: Duration = Duration::from_millis(40);

/// What a replica has done so far
#[derive(Debug, Default)]
struct ReplicaState {
    stopped: AtomicBool,
    started: AtomicU64,
}

/// Default handler on every replica: acknowledges stop and start requests
struct EpochReplica {
    id: TestNodeId,
    state: Arc<ReplicaState>,
}

#[async_trait]
impl ProtocolTask<TestTypes> for EpochReplica {
    fn key(&self) -> String {
        format!("replica-{}", self.id)
    }

    fn refresh_key(&mut self) -> String {
        self.key()
    }

    fn event_types(&self) -> HashSet<TestEventType> {
        HashSet::from([TestEventType::StopEpoch, TestEventType::StartEpoch])
    }

    async fn start(&mut self) -> Result<TaskOutcome<TestTypes>> {
        Ok(TaskOutcome::none())
    }

    async fn handle_event(
        &mut self,
        event: &ProtocolEvent<TestTypes>,
    ) -> Result<TaskOutcome<TestTypes>> {
        let epoch = event.payload.epoch;
        let ack = match event.event_type {
            TestEventType::StopEpoch => {
                self.state.stopped.store(true, Ordering::SeqCst);
                TestEventType::AckStopEpoch
            }
            TestEventType::StartEpoch => {
                self.state.started.fetch_max(epoch, Ordering::SeqCst);
                TestEventType::AckStartEpoch
            }
            _ => return Ok(TaskOutcome::none()),
        };
        Ok(TaskOutcome::none().with_message(MessagingTask::new(
            event.sender,
            TestMessage::new(ack, epoch, format!("from {}", self.id)),
        )))
    }
}

/// Coordinator progress
#[derive(Debug, Default)]
struct Progress {
    stop_quorums: AtomicUsize,
    start_quorums: AtomicUsize,
}

/// Coordinator side of one epoch step
struct EpochStep {
    key: String,
    request: TestEventType,
    ack: TestEventType,
    epoch: u64,
    members: Vec<TestNodeId>,
    progress: Arc<Progress>,
}

#[async_trait]
impl ThresholdHandler<TestTypes> for EpochStep {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn refresh_key(&mut self) -> String {
        self.key.push('+');
        self.key.clone()
    }

    fn event_types(&self) -> HashSet<TestEventType> {
        HashSet::from([self.ack])
    }

    fn period(&self) -> Option<Duration> {
        Some(RETRY)
    }

    async fn start(&mut self) -> Result<TaskOutcome<TestTypes>> {
        Ok(TaskOutcome::none().with_message(MessagingTask::multicast(
            self.members.clone(),
            TestMessage::new(self.request, self.epoch, "epoch change"),
        )))
    }

    async fn is_valid_response(&mut self, event: &ProtocolEvent<TestTypes>) -> Result<bool> {
        Ok(event.payload.epoch == self.epoch)
    }

    async fn handle_threshold_event(&mut self) -> Result<TaskOutcome<TestTypes>> {
        if self.request == TestEventType::StopEpoch {
            self.progress.stop_quorums.fetch_add(1, Ordering::SeqCst);
            let start = EpochStep {
                key: format!("start-{}", self.epoch + 1),
                request: TestEventType::StartEpoch,
                ack: TestEventType::AckStartEpoch,
                epoch: self.epoch + 1,
                members: self.members.clone(),
                progress: Arc::clone(&self.progress),
            };
            let majority = self.members.len() / 2 + 1;
            return Ok(TaskOutcome::none()
                .with_follow_up(QuorumTask::new(start, self.members.clone(), majority)));
        }
        self.progress.start_quorums.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutcome::none())
    }
}

/// Wire a coordinator and the replicas over a network with the given loss
/// model, and spawn the stop step on the coordinator.
fn reconfigure(
    reliability: impl NetworkReliability<TestNodeId>,
) -> (
    Arc<MemoryNetwork<TestTypes>>,
    Vec<Arc<ReplicaState>>,
    Arc<Progress>,
    ProtocolExecutor<TestTypes>,
) {
    setup_logging();
    let network = MemoryNetwork::<TestTypes>::new(reliability);
    let coordinator = network.add_node(COORDINATOR, test_config());
    let states: Vec<_> = REPLICAS
        .iter()
        .map(|&id| {
            let state = Arc::new(ReplicaState::default());
            network.add_node(id, test_config()).register_task(EpochReplica {
                id,
                state: Arc::clone(&state),
            });
            state
        })
        .collect();

    let progress = Arc::new(Progress::default());
    let stop = EpochStep {
        key: "stop-0".to_string(),
        request: TestEventType::StopEpoch,
        ack: TestEventType::AckStopEpoch,
        epoch: 0,
        members: REPLICAS.to_vec(),
        progress: Arc::clone(&progress),
    };
    coordinator
        .spawn(QuorumTask::all(stop, REPLICAS))
        .unwrap();
    (network, states, progress, coordinator)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epoch_change_survives_dropped_requests() {
    let (network, states, progress, coordinator) =
        reconfigure(DropFirst::<TestNodeId>::new([2, 3], 1));

    assert!(
        wait_until(Duration::from_secs(3), || {
            progress.start_quorums.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(progress.stop_quorums.load(Ordering::SeqCst), 1);
    // the stop step needed everyone, including the replicas whose first request was lost
    assert!(states.iter().all(|state| state.stopped.load(Ordering::SeqCst)));
    assert_eq!(network.dropped(), 2);
    assert!(
        states
            .iter()
            .filter(|state| state.started.load(Ordering::SeqCst) == 1)
            .count()
            >= 2
    );
    assert!(wait_until(Duration::from_secs(1), || coordinator.is_empty()).await);
    network.shut_down();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epoch_change_survives_random_loss() {
    let lossy = SeededLossyNetwork::new(3, 4, 42).unwrap().with_delay(0, 5);
    let (network, _states, progress, coordinator) = reconfigure(lossy);

    assert!(
        wait_until(Duration::from_secs(10), || {
            progress.start_quorums.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(progress.stop_quorums.load(Ordering::SeqCst), 1);
    assert!(wait_until(Duration::from_secs(1), || coordinator.is_empty()).await);

    // nothing is retransmitted once both steps completed
    tokio::time::sleep(Duration::from_millis(50)).await;
    let delivered = network.delivered() + network.dropped();
    tokio::time::sleep(RETRY * 4).await;
    assert_eq!(network.delivered() + network.dropped(), delivered);
    network.shut_down();
}
