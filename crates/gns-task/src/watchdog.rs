// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::time::Duration;

use tokio::{
    task::AbortHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// watchdog state
pub(crate) struct WatchdogState {
    /// owner, for logs
    pub owner: String,
    /// registry size above which we warn
    pub max_tasks: usize,
    /// whether the previous check was over the limit
    pub over_limit: bool,
}

impl WatchdogState {
    /// Look at the registry size once. Returns true if it is over the limit.
    pub(crate) fn check(&mut self, size: usize) -> bool {
        let was_over = std::mem::replace(&mut self.over_limit, size > self.max_tasks);
        if self.over_limit {
            warn!(
                "{} has too many tasks: {} registered, limit {}",
                self.owner, size, self.max_tasks
            );
        } else if was_over {
            info!("{} is back under the task limit with {} tasks", self.owner, size);
        } else {
            debug!("{} has {} tasks", self.owner, size);
        }
        self.over_limit
    }
}

/// Check the registry every `period`, starting right away.
///
/// `size` returns `None` once the registry is gone, which ends the loop.
pub(crate) fn spawn_watchdog<F>(mut state: WatchdogState, period: Duration, size: F) -> AbortHandle
where
    F: Fn() -> Option<usize> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let Some(size) = size() else {
                debug!("{} watchdog stopping", state.owner);
                break;
            };
            state.check(size);
        }
    })
    .abort_handle()
}
