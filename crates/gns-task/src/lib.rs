// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Task primitives for the GNS protocol executor
#![warn(
    clippy::all,
    clippy::pedantic,
    rust_2018_idioms,
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

/// The executor owning the task registry
pub mod executor;
/// Tasks waiting for a threshold of valid responses
pub mod quorum;
/// Basic task types
pub mod task;
/// Per-task bookkeeping
pub mod wrapper;
/// Periodic check of the registry size
mod watchdog;

pub use executor::ProtocolExecutor;
pub use quorum::{QuorumTask, QuorumTracker, ThresholdHandler};
pub use task::{ProtocolTask, TaskOutcome, TaskStatus};
pub use wrapper::{TaskInfo, TaskWrapper};
