// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Types and Traits for the GNS protocol task executor
#![warn(
    clippy::all,
    clippy::pedantic,
    rust_2018_idioms,
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod event;
pub mod logging;
pub mod message;
pub mod traits;

pub use config::{ConfigError, ExecutorConfig};
pub use event::ProtocolEvent;
pub use message::MessagingTask;
pub use traits::{
    network::{Messenger, NetworkError},
    node_implementation::{ProtocolMessage, ProtocolTypes},
};
