// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_lock::{Mutex as AsyncMutex, MutexGuardArc};
use gns_types::ProtocolTypes;
use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::task::ProtocolTask;

/// Exclusive access to a wrapped task for the duration of one invocation
pub(crate) type TaskGuard<TYPES> = MutexGuardArc<Box<dyn ProtocolTask<TYPES>>>;

/// Snapshot of a registered task, for diagnostics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo<K> {
    /// registry key
    pub key: K,
    /// type name of the task
    pub name: &'static str,
    /// time since the task was registered
    pub age: Duration,
    /// time since the last successful `handle_event`, or since registration
    pub idle: Duration,
    /// true if the task has a periodic restart timer
    pub scheduled: bool,
}

/// Bookkeeping around one registered task.
///
/// The task itself sits behind an async mutex held for the whole of one
/// `start`/`handle_event`/`restart` call, so invocations of the same task
/// never overlap.
pub struct TaskWrapper<TYPES: ProtocolTypes> {
    /// key the task is registered under
    key: TYPES::Key,
    /// type name of the task, for logs
    name: &'static str,
    /// the task
    task: Arc<AsyncMutex<Box<dyn ProtocolTask<TYPES>>>>,
    /// when the wrapper was created
    created: Instant,
    /// last successful `handle_event`; `start` and `restart` do not count
    last_active: Mutex<Instant>,
    /// periodic restart timer, if any
    retry: Mutex<Option<AbortHandle>>,
    /// set once the task left the registry; no invocation may start after this
    removed: AtomicBool,
}

impl<TYPES: ProtocolTypes> Debug for TaskWrapper<TYPES> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWrapper")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("age", &self.age())
            .field("removed", &self.is_removed())
            .finish_non_exhaustive()
    }
}

impl<TYPES: ProtocolTypes> TaskWrapper<TYPES> {
    /// Wrap a task registered under `key`
    #[must_use]
    pub fn new(key: TYPES::Key, task: Box<dyn ProtocolTask<TYPES>>) -> Self {
        let now = Instant::now();
        Self {
            key,
            name: task.name(),
            task: Arc::new(AsyncMutex::new(task)),
            created: now,
            last_active: Mutex::new(now),
            retry: Mutex::new(None),
            removed: AtomicBool::new(false),
        }
    }

    /// registry key
    #[must_use]
    pub fn key(&self) -> &TYPES::Key {
        &self.key
    }

    /// type name of the wrapped task
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// time since the wrapper was created
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// time since the last successful `handle_event`
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// true if no event was handled for longer than `max_idle`
    #[must_use]
    pub fn is_idle_for(&self, max_idle: Duration) -> bool {
        self.idle() > max_idle
    }

    /// true if the task was created more than `max_age` ago
    #[must_use]
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    /// true once the task has left the registry
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// true if a periodic restart timer is armed
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.retry.lock().is_some()
    }

    /// diagnostics snapshot
    #[must_use]
    pub fn info(&self) -> TaskInfo<TYPES::Key> {
        TaskInfo {
            key: self.key.clone(),
            name: self.name,
            age: self.age(),
            idle: self.idle(),
            scheduled: self.is_scheduled(),
        }
    }

    /// Wait for exclusive access to the task
    pub(crate) async fn lock_task(&self) -> TaskGuard<TYPES> {
        self.task.lock_arc().await
    }

    /// Exclusive access without waiting; only succeeds while nobody else holds the task
    pub(crate) fn try_lock_task(&self) -> Option<TaskGuard<TYPES>> {
        self.task.try_lock_arc()
    }

    /// Record a successful `handle_event`
    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Attach the periodic restart timer.
    ///
    /// If the task was already removed the timer is aborted right away.
    pub(crate) fn set_retry(&self, handle: AbortHandle) {
        let mut retry = self.retry.lock();
        if self.is_removed() {
            handle.abort();
            return;
        }
        if let Some(previous) = retry.replace(handle) {
            previous.abort();
        }
    }

    /// Mark the task removed and abort its timer, as one step.
    ///
    /// Returns false if it was already removed.
    pub(crate) fn retire(&self) -> bool {
        let mut retry = self.retry.lock();
        if self.removed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(handle) = retry.take() {
            handle.abort();
        }
        true
    }
}
