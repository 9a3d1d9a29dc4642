use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Message, Network, NetworkEvent, RemoteId, TransportError};

#[derive(Default)]
struct Link {
    queues: [VecDeque<NetworkEvent>; 2],
    connected: bool,
}

struct Shared {
    ids: [RemoteId; 2],
    link: Mutex<Link>,
    ready: Condvar,
}

/// One end of an in-process connection.
///
/// Both channel types are delivered reliably and in order.
#[derive(Clone)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
    side: usize,
}

impl LoopbackNetwork {
    /// Two connected ends. Each sees a `Connected` event for the other on
    /// its first poll.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let ids = [RemoteId::generate(), RemoteId::generate()];
        let mut link = Link {
            connected: true,
            ..Link::default()
        };
        link.queues[0].push_back(NetworkEvent::Connected(ids[1]));
        link.queues[1].push_back(NetworkEvent::Connected(ids[0]));

        let shared = Arc::new(Shared {
            ids,
            link: Mutex::new(link),
            ready: Condvar::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
                side: 0,
            },
            Self { shared, side: 1 },
        )
    }

    /// The other end's id.
    #[must_use]
    pub fn peer_id(&self) -> RemoteId {
        self.shared.ids[1 - self.side]
    }

    /// Tears the link down; both ends see `Disconnected`.
    pub fn close(&self) {
        let mut link = self.shared.link.lock();
        if !link.connected {
            return;
        }
        link.connected = false;
        link.queues[0].push_back(NetworkEvent::Disconnected(self.shared.ids[1]));
        link.queues[1].push_back(NetworkEvent::Disconnected(self.shared.ids[0]));
        self.shared.ready.notify_all();
    }
}

impl Network for LoopbackNetwork {
    fn local_id(&self) -> RemoteId {
        self.shared.ids[self.side]
    }

    fn is_connected(&self, remote: RemoteId) -> bool {
        remote == self.peer_id() && self.shared.link.lock().connected
    }

    fn remotes(&self) -> Vec<RemoteId> {
        if self.shared.link.lock().connected {
            vec![self.peer_id()]
        } else {
            Vec::new()
        }
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        let remote = message.remote();
        let mut link = self.shared.link.lock();
        if remote != self.peer_id() || !link.connected {
            return Err(TransportError::NotConnected(remote));
        }
        let inbound = message.with_remote(self.local_id());
        link.queues[1 - self.side].push_back(NetworkEvent::Message(inbound));
        self.shared.ready.notify_all();
        Ok(())
    }

    fn poll(&self, timeout: Option<Duration>) -> Result<Vec<NetworkEvent>, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut link = self.shared.link.lock();
        while link.queues[self.side].is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.shared.ready.wait_until(&mut link, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.ready.wait(&mut link),
            }
        }
        Ok(link.queues[self.side].drain(..).collect())
    }

    fn disconnect(&self, remote: RemoteId) {
        if remote == self.peer_id() {
            self.close();
        }
    }
}
