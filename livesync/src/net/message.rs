use super::{ChannelType, RemoteId};

/// An opaque payload tagged with its remote and channel.
///
/// Outbound, `remote` is the destination; inbound, it is the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    remote: RemoteId,
    channel: ChannelType,
    payload: Vec<u8>,
}

impl Message {
    #[must_use]
    pub fn new(remote: RemoteId, channel: ChannelType, payload: Vec<u8>) -> Self {
        Self {
            remote,
            channel,
            payload,
        }
    }

    #[must_use]
    pub fn remote(&self) -> RemoteId {
        self.remote
    }

    #[must_use]
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Same payload and channel, addressed to or from `remote`.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteId) -> Self {
        self.remote = remote;
        self
    }
}
