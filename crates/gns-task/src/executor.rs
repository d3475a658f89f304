// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! The protocol executor: keyed task registry, default handler table and
//! periodic restart timers.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::Result;
use dashmap::{mapref::entry::Entry, DashMap};
use gns_types::{
    constants::TOO_MANY_TASKS_CHECK_PERIOD, ExecutorConfig, Messenger, MessagingTask,
    ProtocolEvent, ProtocolTypes,
};
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::AbortHandle, time::sleep};
use tracing::{debug, error, warn};

use crate::{
    task::{ProtocolTask, TaskOutcome, TaskStatus},
    watchdog::{spawn_watchdog, WatchdogState},
    wrapper::{TaskGuard, TaskInfo, TaskWrapper},
};

/// What to do when a task's key is already registered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OnCollision {
    /// ask the task for a fresh key until one is free
    Refresh,
    /// drop the task
    Refuse,
}

/// Which table a wrapper came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// keyed registry; errors and cancels remove the task
    Registry,
    /// default handler table; handlers stay until unregistered
    Default,
}

/// Shared state behind every clone of a [`ProtocolExecutor`]
struct ExecutorInner<TYPES: ProtocolTypes> {
    /// node we run on
    my_id: TYPES::NodeId,
    /// transport for outgoing messages
    messenger: Arc<dyn Messenger<TYPES>>,
    /// limits and periods
    config: ExecutorConfig,
    /// keyed tasks
    tasks: DashMap<TYPES::Key, Arc<TaskWrapper<TYPES>>>,
    /// stateless handlers, tried before the keyed tasks
    default_tasks: DashMap<TYPES::EventType, Arc<TaskWrapper<TYPES>>>,
    /// registry size check
    watchdog: Mutex<Option<AbortHandle>>,
}

impl<TYPES: ProtocolTypes> Drop for ExecutorInner<TYPES> {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.get_mut().take() {
            watchdog.abort();
        }
        self.tasks.retain(|_, wrapper| {
            wrapper.retire();
            false
        });
    }
}

/// Runs protocol tasks for one node.
///
/// Incoming events go to [`ProtocolExecutor::handle_event`]; the default
/// handler registered for the event's type gets it if there is one, otherwise
/// the task registered under the event's key. Outgoing messages are stamped
/// with a key and handed to the [`Messenger`]. Clones share one registry.
pub struct ProtocolExecutor<TYPES: ProtocolTypes> {
    /// shared state
    inner: Arc<ExecutorInner<TYPES>>,
}

impl<TYPES: ProtocolTypes> Clone for ProtocolExecutor<TYPES> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<TYPES: ProtocolTypes> fmt::Display for ProtocolExecutor<TYPES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolExecutor{}", self.inner.my_id)
    }
}

impl<TYPES: ProtocolTypes> fmt::Debug for ProtocolExecutor<TYPES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolExecutor")
            .field("my_id", &self.inner.my_id)
            .field("tasks", &self.size())
            .field("default_tasks", &self.inner.default_tasks.len())
            .finish_non_exhaustive()
    }
}

impl<TYPES: ProtocolTypes> ProtocolExecutor<TYPES> {
    /// Create an executor sending through `messenger`.
    ///
    /// Starts the watchdog when called inside a tokio runtime; outside one
    /// the executor works but nobody watches the registry size.
    #[must_use]
    pub fn new(messenger: Arc<dyn Messenger<TYPES>>, config: ExecutorConfig) -> Self {
        let executor = Self {
            inner: Arc::new(ExecutorInner {
                my_id: messenger.my_id(),
                messenger,
                config,
                tasks: DashMap::new(),
                default_tasks: DashMap::new(),
                watchdog: Mutex::new(None),
            }),
        };
        if Handle::try_current().is_ok() {
            let mut period = executor.inner.config.watchdog_period;
            if period.is_zero() {
                error!(
                    "{executor} configured with a zero watchdog period, checking every {:?} instead",
                    TOO_MANY_TASKS_CHECK_PERIOD
                );
                period = TOO_MANY_TASKS_CHECK_PERIOD;
            }
            let weak = Arc::downgrade(&executor.inner);
            let state = WatchdogState {
                owner: executor.to_string(),
                max_tasks: executor.inner.config.max_tasks,
                over_limit: false,
            };
            let handle = spawn_watchdog(state, period, move || {
                weak.upgrade().map(|inner| inner.tasks.len())
            });
            *executor.inner.watchdog.lock() = Some(handle);
        } else {
            warn!("{executor} created outside a tokio runtime, watchdog not started");
        }
        executor
    }

    /// id of the node this executor runs on
    #[must_use]
    pub fn my_id(&self) -> &TYPES::NodeId {
        &self.inner.my_id
    }

    /// limits and periods in use
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// true while the registry size watchdog is alive
    #[must_use]
    pub fn watchdog_running(&self) -> bool {
        self.inner
            .watchdog
            .lock()
            .as_ref()
            .is_some_and(|watchdog| !watchdog.is_finished())
    }

    /// Build the outcome a task returns to remove itself.
    ///
    /// The executor treats it as a clean end: nothing is logged as an error.
    #[must_use]
    pub fn cancel(task: &dyn ProtocolTask<TYPES>) -> TaskOutcome<TYPES> {
        debug!("Cancelling task {}:{}", task.name(), task.key());
        TaskOutcome::cancel()
    }

    // default handlers

    /// Install `task` as the default handler for `event_type`, replacing any previous one
    pub fn register(&self, event_type: TYPES::EventType, task: impl ProtocolTask<TYPES>) {
        self.register_types([event_type], task);
    }

    /// Install `task` as the default handler for every type in `task.event_types()`
    pub fn register_task(&self, task: impl ProtocolTask<TYPES>) {
        let types = task.event_types();
        self.register_types(types, task);
    }

    /// Install one shared instance of `task` as the default handler for every type in `types`
    pub fn register_types(
        &self,
        types: impl IntoIterator<Item = TYPES::EventType>,
        task: impl ProtocolTask<TYPES>,
    ) {
        let key = task.key();
        let wrapper = Arc::new(TaskWrapper::new(key, Box::new(task)));
        for event_type in types {
            let previous = self
                .inner
                .default_tasks
                .insert(event_type, Arc::clone(&wrapper));
            if let Some(previous) = previous {
                debug!(
                    "{self} replaced default handler {}:{} for {event_type:?}",
                    previous.name(),
                    previous.key()
                );
            }
            debug!(
                "{self} registered {}:{} for {event_type:?}",
                wrapper.name(),
                wrapper.key()
            );
        }
    }

    /// Remove the default handler for `event_type` if it is the one registered under `key`
    pub fn unregister(&self, event_type: TYPES::EventType, key: &TYPES::Key) -> bool {
        let removed = self
            .inner
            .default_tasks
            .remove_if(&event_type, |_, current| current.key() == key);
        match removed {
            Some((_, handler)) => {
                debug!("{self} unregistered {}:{key} for {event_type:?}", handler.name());
                true
            }
            None => false,
        }
    }

    /// true if a default handler is installed for `event_type`
    #[must_use]
    pub fn has_default(&self, event_type: &TYPES::EventType) -> bool {
        self.inner.default_tasks.contains_key(event_type)
    }

    // keyed tasks

    /// Register `task` under a free key and start it.
    ///
    /// If the key is taken the task is asked for fresh keys. A task whose
    /// `period` is set is also restarted every period, as with [`Self::schedule`].
    /// Returns the key, or `None` if no free key was found.
    ///
    /// # Panics
    /// If called outside a tokio runtime.
    pub fn spawn(&self, task: impl ProtocolTask<TYPES>) -> Option<TYPES::Key> {
        self.spawn_boxed(Box::new(task))
    }

    /// [`Self::spawn`] for an already boxed task, such as a follow-up
    ///
    /// # Panics
    /// If called outside a tokio runtime.
    pub fn spawn_boxed(&self, task: Box<dyn ProtocolTask<TYPES>>) -> Option<TYPES::Key> {
        let period = task.period();
        self.launch(task, period, OnCollision::Refresh)
    }

    /// Spawn `task` only if nothing is registered under its current key
    ///
    /// # Panics
    /// If called outside a tokio runtime.
    pub fn spawn_if_not_running(&self, task: impl ProtocolTask<TYPES>) -> bool {
        let period = task.period();
        self.launch(Box::new(task), period, OnCollision::Refuse)
            .is_some()
    }

    /// Spawn `task` and restart it every `period`, timed from the end of the
    /// previous invocation.
    ///
    /// # Panics
    /// If called outside a tokio runtime.
    pub fn schedule(
        &self,
        task: impl ProtocolTask<TYPES>,
        period: Duration,
    ) -> Option<TYPES::Key> {
        self.launch(Box::new(task), Some(period), OnCollision::Refresh)
    }

    /// [`Self::schedule`] with the task's own period, or the configured default
    ///
    /// # Panics
    /// If called outside a tokio runtime.
    pub fn schedule_default(&self, task: impl ProtocolTask<TYPES>) -> Option<TYPES::Key> {
        let period = task
            .period()
            .unwrap_or(self.inner.config.default_restart_period);
        self.launch(Box::new(task), Some(period), OnCollision::Refresh)
    }

    /// Route `event` to its default handler, or else to the task registered
    /// under its key. Returns false if nothing matched.
    pub async fn handle_event(&self, event: &ProtocolEvent<TYPES>) -> bool {
        let default = self
            .inner
            .default_tasks
            .get(&event.event_type)
            .map(|handler| Arc::clone(handler.value()));
        let (wrapper, origin) = if let Some(wrapper) = default {
            (wrapper, Origin::Default)
        } else if let Some(key) = &event.key {
            let found = self
                .inner
                .tasks
                .get(key)
                .map(|task| Arc::clone(task.value()));
            let Some(wrapper) = found else {
                debug!("{self} found no task for key {key}");
                return false;
            };
            (wrapper, Origin::Registry)
        } else {
            warn!(
                "{self} has no default handler for {:?} and the event has no key",
                event.event_type
            );
            return false;
        };

        let mut guard = wrapper.lock_task().await;
        if wrapper.is_removed() {
            debug!(
                "{self} dropping event for removed task {}:{}",
                wrapper.name(),
                wrapper.key()
            );
            return false;
        }
        debug!(
            "{self} handing {:?} from {} to {}:{}",
            event.event_type,
            event.sender,
            wrapper.name(),
            wrapper.key()
        );
        let result = guard.handle_event(event).await;
        if result.is_ok() {
            wrapper.touch();
        }
        self.finish(&wrapper, origin, "handle_event", result, event.key.as_ref())
            .await;
        drop(guard);
        true
    }

    /// Remove the task registered under `key` and cancel its timer.
    ///
    /// The timer is aborted while the registry entry is still locked, so no
    /// tick can observe the task as registered afterwards.
    pub fn remove(&self, key: &TYPES::Key) -> bool {
        match self.inner.tasks.remove_if(key, |_, wrapper| wrapper.retire()) {
            Some((_, wrapper)) => {
                debug!("{self} removed task {}:{key}", wrapper.name());
                true
            }
            None => false,
        }
    }

    /// number of keyed tasks
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.tasks.len()
    }

    /// true if no keyed task is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    /// true if a task is registered under `key`
    #[must_use]
    pub fn is_running(&self, key: &TYPES::Key) -> bool {
        self.inner.tasks.contains_key(key)
    }

    /// diagnostics for the task registered under `key`
    #[must_use]
    pub fn task_info(&self, key: &TYPES::Key) -> Option<TaskInfo<TYPES::Key>> {
        self.inner.tasks.get(key).map(|wrapper| wrapper.info())
    }

    /// keys of the tasks that handled no event for longer than `max_idle`
    #[must_use]
    pub fn idle_tasks(&self, max_idle: Duration) -> Vec<TYPES::Key> {
        self.inner
            .tasks
            .iter()
            .filter(|entry| entry.value().is_idle_for(max_idle))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// keys of the tasks registered more than `max_age` ago
    #[must_use]
    pub fn tasks_older_than(&self, max_age: Duration) -> Vec<TYPES::Key> {
        self.inner
            .tasks
            .iter()
            .filter(|entry| entry.value().is_older_than(max_age))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stop the watchdog and every timer, drop all tasks and handlers, and
    /// shut the messenger down
    pub fn stop(&self) {
        if let Some(watchdog) = self.inner.watchdog.lock().take() {
            watchdog.abort();
        }
        let mut dropped = 0_usize;
        self.inner.tasks.retain(|_, wrapper| {
            wrapper.retire();
            dropped += 1;
            false
        });
        self.inner.default_tasks.clear();
        debug!("{self} stopped, dropped {dropped} tasks");
        self.inner.messenger.stop();
    }

    /// Insert `task` and kick off its `start`, arming a timer if `period` is set
    fn launch(
        &self,
        task: Box<dyn ProtocolTask<TYPES>>,
        period: Option<Duration>,
        on_collision: OnCollision,
    ) -> Option<TYPES::Key> {
        if let Some(period) = period {
            if period < self.inner.config.min_restart_period {
                warn!(
                    "{self} scheduling {} every {period:?}, below the {:?} floor",
                    task.name(),
                    self.inner.config.min_restart_period
                );
            }
        }
        let (wrapper, guard) = self.insert(task, on_collision)?;
        let key = wrapper.key().clone();
        if let Some(period) = period {
            self.arm_restarts(&wrapper, period);
        }
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run_start(wrapper, guard).await;
        });
        Some(key)
    }

    /// Put `task` in the registry under a free key.
    ///
    /// The task is locked before it becomes visible, so `start` is its first invocation.
    fn insert(
        &self,
        mut task: Box<dyn ProtocolTask<TYPES>>,
        on_collision: OnCollision,
    ) -> Option<(Arc<TaskWrapper<TYPES>>, TaskGuard<TYPES>)> {
        let mut key = task.key();
        let mut attempts = 0;
        loop {
            if let Entry::Vacant(slot) = self.inner.tasks.entry(key.clone()) {
                let wrapper = Arc::new(TaskWrapper::new(key, task));
                let guard = wrapper.try_lock_task()?;
                debug!("{self} inserting {}:{}", wrapper.name(), wrapper.key());
                slot.insert(Arc::clone(&wrapper));
                return Some((wrapper, guard));
            }
            if on_collision == OnCollision::Refuse {
                debug!("{self} not spawning {}: {key} is running", task.name());
                return None;
            }
            if attempts == self.inner.config.max_key_refresh_attempts {
                error!(
                    "{self} found no free key for {} after {attempts} attempts, dropping it",
                    task.name()
                );
                return None;
            }
            attempts += 1;
            key = task.refresh_key();
        }
    }

    /// Restart `wrapper` every `period` until it is removed or the executor is dropped
    fn arm_restarts(&self, wrapper: &Arc<TaskWrapper<TYPES>>, period: Duration) {
        let executor = Arc::downgrade(&self.inner);
        let task = Arc::downgrade(wrapper);
        let handle = tokio::spawn(async move {
            loop {
                sleep(period).await;
                let (Some(inner), Some(wrapper)) = (executor.upgrade(), task.upgrade()) else {
                    break;
                };
                if !Self::from_inner(inner).run_restart(&wrapper).await {
                    break;
                }
            }
        });
        wrapper.set_retry(handle.abort_handle());
    }

    /// executor handle from shared state
    fn from_inner(inner: Arc<ExecutorInner<TYPES>>) -> Self {
        Self { inner }
    }

    /// First invocation of a freshly inserted task; `guard` was taken before insertion
    async fn run_start(&self, wrapper: Arc<TaskWrapper<TYPES>>, mut guard: TaskGuard<TYPES>) {
        if wrapper.is_removed() {
            return;
        }
        let result = guard.start().await;
        let key = wrapper.key().clone();
        self.finish(&wrapper, Origin::Registry, "start", result, Some(&key))
            .await;
        drop(guard);
    }

    /// One timer tick. Returns false once the task is gone.
    async fn run_restart(&self, wrapper: &Arc<TaskWrapper<TYPES>>) -> bool {
        let mut guard = wrapper.lock_task().await;
        if wrapper.is_removed() {
            return false;
        }
        debug!("{self} restarting {}:{}", wrapper.name(), wrapper.key());
        let result = guard.restart().await;
        let key = wrapper.key().clone();
        self.finish(wrapper, Origin::Registry, "restart", result, Some(&key))
            .await;
        drop(guard);
        !wrapper.is_removed()
    }

    /// Act on what one invocation produced; the caller still holds the task.
    async fn finish(
        &self,
        wrapper: &Arc<TaskWrapper<TYPES>>,
        origin: Origin,
        step: &str,
        result: Result<TaskOutcome<TYPES>>,
        stamp: Option<&TYPES::Key>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    "{self} task {}:{} failed in {step}: {err:?}",
                    wrapper.name(),
                    wrapper.key()
                );
                if origin == Origin::Registry {
                    self.remove_wrapper(wrapper);
                }
                return;
            }
        };
        let TaskOutcome {
            messages,
            follow_up,
            status,
        } = outcome;
        self.send(messages, stamp).await;
        if let Some(task) = follow_up {
            self.spawn_boxed(task);
        }
        if status == TaskStatus::Cancel {
            match origin {
                Origin::Registry => {
                    debug!("{self} task {}:{} cancelled", wrapper.name(), wrapper.key());
                    self.remove_wrapper(wrapper);
                }
                Origin::Default => debug!(
                    "{self} default handler {}:{} cancelled, it stays registered",
                    wrapper.name(),
                    wrapper.key()
                ),
            }
        }
    }

    /// Remove `wrapper` from the registry, unless its key already belongs to another task
    fn remove_wrapper(&self, wrapper: &Arc<TaskWrapper<TYPES>>) {
        self.inner
            .tasks
            .remove_if(wrapper.key(), |_, current| Arc::ptr_eq(current, wrapper));
        wrapper.retire();
    }

    /// Stamp and send every non-empty messaging task; failures are logged
    async fn send(&self, messages: Vec<MessagingTask<TYPES>>, stamp: Option<&TYPES::Key>) {
        for mut mtask in messages {
            if mtask.is_empty() {
                continue;
            }
            if let Some(key) = stamp {
                mtask.stamp_key(key);
            }
            if let Err(err) = self.inner.messenger.send(&mtask).await {
                warn!("{self} failed to send {mtask:?}: {err}");
            }
        }
    }
}
