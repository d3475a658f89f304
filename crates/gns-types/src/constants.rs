// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! configurable constants for the protocol executor

use std::time::Duration;

/// Default period between two restarts of a scheduled task.
///
/// The transport already retransmits, so protocol-level retransmission only
/// has to cover crashes and heavy congestion.
pub const DEFAULT_RESTART_PERIOD: Duration = Duration::from_secs(60);

/// Periods below this floor are accepted but logged as a warning
pub const MIN_RESTART_PERIOD: Duration = Duration::from_secs(60);

/// the number of registered tasks above which the watchdog starts warning
pub const MAX_TASKS: usize = 10_000;

/// How often the watchdog checks the registry size
pub const TOO_MANY_TASKS_CHECK_PERIOD: Duration = Duration::from_secs(300);

/// How many times a task is asked for a fresh key before it is dropped
pub const MAX_KEY_REFRESH_ATTEMPTS: usize = 1_000;
