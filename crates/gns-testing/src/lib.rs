// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Test harness for the GNS protocol executor
#![cfg_attr(
    not(any(test, debug_assertions)),
    deprecated = "suspicious usage of testing implementations in non-test/non-debug build"
)]

/// concrete types to run executors over
pub mod node_types;

/// messenger that records what it sends
pub mod messenger;

/// executors wired together in memory
pub mod memory_network;

/// deterministic packet loss
pub mod reliability;

/// reusable tasks and helpers for tests
pub mod task_helpers;
