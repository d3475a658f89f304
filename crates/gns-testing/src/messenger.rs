// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_broadcast::{broadcast, InactiveReceiver, Receiver, SendError, Sender};
use async_trait::async_trait;
use gns_types::{Messenger, MessagingTask, NetworkError, ProtocolTypes};
use parking_lot::Mutex;

/// A messenger that puts nothing on the wire.
///
/// Every send is recorded and republished on a broadcast channel, so tests
/// can either inspect the history or await the next send.
pub struct RecordingMessenger<TYPES: ProtocolTypes> {
    /// node we pretend to be
    my_id: TYPES::NodeId,
    /// every messaging task handed to `send`, in order
    sent: Mutex<Vec<MessagingTask<TYPES>>>,
    /// recipients whose sends fail
    unreachable: Mutex<HashSet<TYPES::NodeId>>,
    /// set by `stop`
    stopped: AtomicBool,
    /// republishes sends
    sender: Sender<MessagingTask<TYPES>>,
    /// keeps the channel open while nobody listens
    receiver: InactiveReceiver<MessagingTask<TYPES>>,
}

impl<TYPES: ProtocolTypes> RecordingMessenger<TYPES> {
    /// create a messenger for node `my_id`
    #[must_use]
    pub fn new(my_id: TYPES::NodeId) -> Arc<Self> {
        let (mut sender, mut receiver) = broadcast(1024);
        sender.set_overflow(true);
        sender.set_await_active(false);
        receiver.set_overflow(true);
        Arc::new(Self {
            my_id,
            sent: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
            sender,
            receiver: receiver.deactivate(),
        })
    }

    /// receive every send from now on
    #[must_use]
    pub fn subscribe(&self) -> Receiver<MessagingTask<TYPES>> {
        self.receiver.activate_cloned()
    }

    /// every messaging task sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<MessagingTask<TYPES>> {
        self.sent.lock().clone()
    }

    /// every message sent so far, flattened
    #[must_use]
    pub fn sent_messages(&self) -> Vec<TYPES::Message> {
        self.sent()
            .into_iter()
            .flat_map(|mtask| mtask.msgs)
            .collect()
    }

    /// number of messaging tasks sent so far
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// make sends to `node` fail
    pub fn make_unreachable(&self, node: TYPES::NodeId) {
        self.unreachable.lock().insert(node);
    }

    /// true once `stop` was called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<TYPES: ProtocolTypes> Messenger<TYPES> for RecordingMessenger<TYPES> {
    fn my_id(&self) -> TYPES::NodeId {
        self.my_id.clone()
    }

    async fn send(&self, task: &MessagingTask<TYPES>) -> Result<(), NetworkError> {
        if self.is_stopped() {
            return Err(NetworkError::ShutDown);
        }
        {
            let unreachable = self.unreachable.lock();
            if let Some(recipient) = task
                .recipients
                .iter()
                .find(|recipient| unreachable.contains(*recipient))
            {
                return Err(NetworkError::CouldNotDeliver {
                    recipient: recipient.to_string(),
                });
            }
        }
        self.sent.lock().push(task.clone());
        match self.sender.broadcast_direct(task.clone()).await {
            Ok(None) => (),
            Ok(Some(overflowed)) => {
                tracing::warn!("Recording queue overflow, oldest send dropped: {overflowed:?}");
            }
            Err(SendError(_)) => return Err(NetworkError::ChannelSend),
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
