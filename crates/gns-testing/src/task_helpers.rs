// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use gns_task::{ProtocolExecutor, ProtocolTask, TaskOutcome};
use gns_types::{ExecutorConfig, MessagingTask, ProtocolEvent};
use parking_lot::Mutex;
use tokio::time::{sleep, timeout};

use crate::node_types::{TestEventType, TestMessage, TestTypes};

/// Executor config with short periods, for tests
#[must_use]
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        default_restart_period: Duration::from_millis(100),
        min_restart_period: Duration::from_millis(10),
        max_tasks: 1_000,
        watchdog_period: Duration::from_secs(1),
        max_key_refresh_attempts: 64,
    }
}

/// Poll `condition` every 10ms until it holds or `limit` passed.
/// Returns whether it held.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    timeout(limit, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Which invocation of a [`ProbeTask`] ran
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Invocation {
    /// `start`
    Start,
    /// `handle_event`
    Event,
    /// `restart`
    Restart,
}

/// Everything a [`ProbeTask`] observed; shared with the test body
#[derive(Debug, Default)]
pub struct ProbeLog {
    /// invocations in order
    calls: Mutex<Vec<Invocation>>,
    /// invocations currently running
    active: AtomicUsize,
    /// times an invocation began while another one was running
    overlaps: AtomicUsize,
    /// events received
    events: Mutex<Vec<ProtocolEvent<TestTypes>>>,
}

impl ProbeLog {
    /// fresh shared log
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// invocations in order
    #[must_use]
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// how often `kind` ran
    #[must_use]
    pub fn count(&self, kind: Invocation) -> usize {
        self.calls().into_iter().filter(|call| *call == kind).count()
    }

    /// events received, in order
    #[must_use]
    pub fn events(&self) -> Vec<ProtocolEvent<TestTypes>> {
        self.events.lock().clone()
    }

    /// times two invocations of the same task ran at once
    #[must_use]
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// an invocation begins
    fn enter(&self, kind: Invocation) {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().push(kind);
    }

    /// an invocation ends
    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What a [`ProbeTask`] does after an invocation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeAction {
    /// return nothing
    #[default]
    Nothing,
    /// return an error
    Fail,
    /// cancel itself
    Cancel,
    /// answer the event's sender with a `Response`
    Reply,
}

/// Configurable task that records every invocation in a [`ProbeLog`]
#[derive(Debug)]
pub struct ProbeTask {
    /// key before any refresh
    base: String,
    /// current key
    key: String,
    /// refreshes so far
    refreshes: usize,
    /// types reported by `event_types`
    event_types: HashSet<TestEventType>,
    /// shared observations
    log: Arc<ProbeLog>,
    /// sent by `start`
    start_messages: Vec<MessagingTask<TestTypes>>,
    /// after `handle_event`
    on_event: ProbeAction,
    /// after `restart`
    on_restart: ProbeAction,
    /// time spent inside every invocation
    work: Duration,
    /// restart period
    period: Option<Duration>,
    /// spawned after the first event
    follow_up: Option<Box<ProbeTask>>,
}

impl ProbeTask {
    /// a task keyed `key` that does nothing but record
    #[must_use]
    pub fn new(key: impl Into<String>, log: Arc<ProbeLog>) -> Self {
        let key = key.into();
        Self {
            base: key.clone(),
            key,
            refreshes: 0,
            event_types: HashSet::from([TestEventType::Response]),
            log,
            start_messages: Vec::new(),
            on_event: ProbeAction::Nothing,
            on_restart: ProbeAction::Nothing,
            work: Duration::ZERO,
            period: None,
            follow_up: None,
        }
    }

    /// send `mtask` from `start`
    #[must_use]
    pub fn sending(mut self, mtask: MessagingTask<TestTypes>) -> Self {
        self.start_messages.push(mtask);
        self
    }

    /// report `types` from `event_types`
    #[must_use]
    pub fn listening(mut self, types: impl IntoIterator<Item = TestEventType>) -> Self {
        self.event_types = types.into_iter().collect();
        self
    }

    /// act after every event
    #[must_use]
    pub fn on_event(mut self, action: ProbeAction) -> Self {
        self.on_event = action;
        self
    }

    /// act after every restart
    #[must_use]
    pub fn on_restart(mut self, action: ProbeAction) -> Self {
        self.on_restart = action;
        self
    }

    /// spend `work` inside every invocation
    #[must_use]
    pub fn working(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    /// ask to be restarted every `period`
    #[must_use]
    pub fn every(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// spawn `next` after the first event
    #[must_use]
    pub fn then(mut self, next: ProbeTask) -> Self {
        self.follow_up = Some(Box::new(next));
        self
    }

    /// run one invocation body
    async fn invoke(&self, kind: Invocation) {
        self.log.enter(kind);
        if !self.work.is_zero() {
            sleep(self.work).await;
        }
        self.log.exit();
    }

    /// outcome for `action`
    fn act(
        &self,
        action: ProbeAction,
        event: Option<&ProtocolEvent<TestTypes>>,
    ) -> Result<TaskOutcome<TestTypes>> {
        match action {
            ProbeAction::Nothing => Ok(TaskOutcome::none()),
            ProbeAction::Fail => bail!("probe {} failed on purpose", self.key),
            ProbeAction::Cancel => Ok(ProtocolExecutor::<TestTypes>::cancel(self)),
            ProbeAction::Reply => Ok(event.map_or_else(TaskOutcome::none, |event| {
                TaskOutcome::none().with_message(MessagingTask::new(
                    event.sender,
                    TestMessage::new(TestEventType::Response, event.payload.epoch, "reply"),
                ))
            })),
        }
    }
}

#[async_trait]
impl ProtocolTask<TestTypes> for ProbeTask {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn refresh_key(&mut self) -> String {
        self.refreshes += 1;
        self.key = format!("{}#{}", self.base, self.refreshes);
        self.key.clone()
    }

    fn event_types(&self) -> HashSet<TestEventType> {
        self.event_types.clone()
    }

    fn period(&self) -> Option<Duration> {
        self.period
    }

    async fn start(&mut self) -> Result<TaskOutcome<TestTypes>> {
        self.invoke(Invocation::Start).await;
        Ok(TaskOutcome::send(self.start_messages.clone()))
    }

    async fn handle_event(
        &mut self,
        event: &ProtocolEvent<TestTypes>,
    ) -> Result<TaskOutcome<TestTypes>> {
        self.invoke(Invocation::Event).await;
        self.log.events.lock().push(event.clone());
        let mut outcome = self.act(self.on_event, Some(event))?;
        if let Some(next) = self.follow_up.take() {
            outcome.follow_up = Some(next);
        }
        Ok(outcome)
    }

    async fn restart(&mut self) -> Result<TaskOutcome<TestTypes>> {
        self.invoke(Invocation::Restart).await;
        self.act(self.on_restart, None)
    }
}
