// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! In memory network simulator
//!
//! Wires several [`ProtocolExecutor`]s together inside one process. Every
//! message of a send is passed through a [`NetworkReliability`] model and,
//! if kept, decoded into a [`ProtocolEvent`] and handed to the recipient's
//! executor on its own tokio task.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use gns_task::ProtocolExecutor;
use gns_types::{
    ExecutorConfig, Messenger, MessagingTask, NetworkError, ProtocolEvent, ProtocolTypes,
};
use tracing::{debug, trace};

use crate::reliability::{NetworkReliability, PerfectNetwork};

/// Shared state for in-memory mock networking.
pub struct MemoryNetwork<TYPES: ProtocolTypes> {
    /// executors by node id
    nodes: DashMap<TYPES::NodeId, ProtocolExecutor<TYPES>>,
    /// decides which messages are lost
    reliability: Box<dyn NetworkReliability<TYPES::NodeId>>,
    /// messages handed to an executor
    delivered: AtomicUsize,
    /// messages lost on purpose
    dropped: AtomicUsize,
}

impl<TYPES: ProtocolTypes> Debug for MemoryNetwork<TYPES> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("reliability", &self.reliability)
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl<TYPES: ProtocolTypes> MemoryNetwork<TYPES> {
    /// an empty network losing messages according to `reliability`
    #[must_use]
    pub fn new(reliability: impl NetworkReliability<TYPES::NodeId>) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            reliability: Box::new(reliability),
            delivered: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        })
    }

    /// an empty network that loses nothing
    #[must_use]
    pub fn perfect() -> Arc<Self> {
        Self::new(PerfectNetwork {})
    }

    /// Create an executor for `id` and attach it to the network
    ///
    /// # Panics
    /// If called outside a tokio runtime.
    pub fn add_node(
        self: &Arc<Self>,
        id: TYPES::NodeId,
        config: ExecutorConfig,
    ) -> ProtocolExecutor<TYPES> {
        let endpoint = Arc::new(MemoryEndpoint {
            id: id.clone(),
            network: Arc::clone(self),
        });
        let executor = ProtocolExecutor::new(endpoint, config);
        self.nodes.insert(id, executor.clone());
        executor
    }

    /// the executor of `id`, if attached
    #[must_use]
    pub fn node(&self, id: &TYPES::NodeId) -> Option<ProtocolExecutor<TYPES>> {
        self.nodes.get(id).map(|node| node.value().clone())
    }

    /// Detach `id`; messages to it fail from now on
    pub fn remove_node(&self, id: &TYPES::NodeId) -> Option<ProtocolExecutor<TYPES>> {
        self.nodes.remove(id).map(|(_, executor)| executor)
    }

    /// Detach and stop every executor
    pub fn shut_down(&self) {
        let ids: Vec<_> = self.nodes.iter().map(|node| node.key().clone()).collect();
        for id in ids {
            // stopping calls back into `remove_node`, so no shard may be held here
            if let Some(executor) = self.remove_node(&id) {
                executor.stop();
            }
        }
    }

    /// messages handed to an executor so far
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// messages dropped by the reliability model so far
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Pass one message through the reliability model and deliver it
    fn deliver(
        &self,
        from: &TYPES::NodeId,
        to: &TYPES::NodeId,
        msg: &TYPES::Message,
    ) -> Result<(), NetworkError> {
        let Some(target) = self.node(to) else {
            return Err(NetworkError::NoSuchNode {
                recipient: to.to_string(),
            });
        };
        if !self.reliability.sample_keep(from, to) {
            trace!("dropping {msg:?} from {from} to {to}");
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        let delay = self.reliability.sample_delay();
        let event = ProtocolEvent::from_message(from.clone(), msg.clone());
        self.delivered.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !target.handle_event(&event).await {
                debug!("{target} did not handle {:?}", event.event_type);
            }
        });
        Ok(())
    }
}

/// One node's view of the [`MemoryNetwork`]
struct MemoryEndpoint<TYPES: ProtocolTypes> {
    /// node id
    id: TYPES::NodeId,
    /// the shared network
    network: Arc<MemoryNetwork<TYPES>>,
}

#[async_trait]
impl<TYPES: ProtocolTypes> Messenger<TYPES> for MemoryEndpoint<TYPES> {
    fn my_id(&self) -> TYPES::NodeId {
        self.id.clone()
    }

    async fn send(&self, task: &MessagingTask<TYPES>) -> Result<(), NetworkError> {
        let mut first_error = None;
        for recipient in &task.recipients {
            for msg in &task.msgs {
                if let Err(err) = self.network.deliver(&self.id, recipient, msg) {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn stop(&self) {
        self.network.remove_node(&self.id);
    }
}
