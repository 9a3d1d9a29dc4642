use std::sync::Arc;

use super::messages::{PROTOCOL_NAME, PROTOCOL_VERSION, to_client, to_server};
use super::state::{DeviceMode, PlayerState, ServerState};
use super::take::{TakeDescriptor, TakeId};
use crate::event::Subscription;
use crate::net::{ChannelType, Message, Network, NetworkEvent, RemoteId};
use crate::protocol::{
    BinaryReceiver, BinarySender, DataOptions, EventReceiver, EventSender, JsonReceiver,
    JsonSender, Protocol, ProtocolError, TextSender, send_table,
};
use crate::time::FrameRate;
use crate::trace::{debug, info};

/// Capture-side endpoint of the companion protocol.
///
/// Owns the authoritative message table. After [`accept`](Self::accept)
/// the remote has the table and every `send_*` goes out; state senders
/// skip values equal to the last one sent until the next
/// [`send_initialize`](Self::send_initialize).
pub struct CompanionHost {
    protocol: Protocol,

    initialize: EventSender,
    end_session: EventSender,
    server_state: BinarySender<ServerState>,
    player_state: BinarySender<PlayerState>,
    frame_rate: BinarySender<FrameRate>,
    take_list: JsonSender<Vec<TakeDescriptor>>,
    selected_take: BinarySender<TakeId>,
    next_take_name: TextSender,

    set_device_mode: BinaryReceiver<DeviceMode>,
    start_recording: EventReceiver,
    stop_recording: EventReceiver,
    player_start: EventReceiver,
    player_stop: EventReceiver,
    player_pause: EventReceiver,
    player_set_time: BinaryReceiver<f64>,
    set_selected_take: BinaryReceiver<TakeId>,
    set_take_data: JsonReceiver<TakeDescriptor>,
    delete_take: BinaryReceiver<TakeId>,
}

impl CompanionHost {
    /// Builds the message table.
    ///
    /// # Errors
    ///
    /// Only if the table cannot be built, which indicates a duplicated id.
    pub fn new() -> Result<Self, ProtocolError> {
        let protocol = Protocol::new(PROTOCOL_NAME, PROTOCOL_VERSION);
        let reliable = ChannelType::ReliableOrdered;

        Ok(Self {
            initialize: protocol.add_event_sender(to_client::INITIALIZE, reliable)?,
            end_session: protocol.add_event_sender(to_client::END_SESSION, reliable)?,
            server_state: protocol.add_sender(
                to_client::SERVER_STATE,
                reliable,
                DataOptions::ONLY_SEND_CHANGED,
            )?,
            player_state: protocol.add_sender(
                to_client::PLAYER_STATE,
                reliable,
                DataOptions::ONLY_SEND_CHANGED,
            )?,
            frame_rate: protocol.add_sender(
                to_client::FRAME_RATE,
                reliable,
                DataOptions::ONLY_SEND_CHANGED,
            )?,
            take_list: protocol.add_sender(to_client::TAKE_LIST_V0, reliable, DataOptions::NONE)?,
            selected_take: protocol.add_sender(
                to_client::SELECTED_TAKE,
                reliable,
                DataOptions::NONE,
            )?,
            next_take_name: protocol.add_sender(
                to_client::NEXT_TAKE_NAME,
                reliable,
                DataOptions::ONLY_SEND_CHANGED,
            )?,

            set_device_mode: protocol.add_receiver(to_server::SET_DEVICE_MODE, reliable)?,
            start_recording: protocol.add_event_receiver(to_server::START_RECORDING, reliable)?,
            stop_recording: protocol.add_event_receiver(to_server::STOP_RECORDING, reliable)?,
            player_start: protocol.add_event_receiver(to_server::PLAYER_START, reliable)?,
            player_stop: protocol.add_event_receiver(to_server::PLAYER_STOP, reliable)?,
            player_pause: protocol.add_event_receiver(to_server::PLAYER_PAUSE, reliable)?,
            player_set_time: protocol
                .add_receiver(to_server::PLAYER_SET_TIME, ChannelType::UnreliableUnordered)?,
            set_selected_take: protocol.add_receiver(to_server::SET_SELECTED_TAKE, reliable)?,
            set_take_data: protocol.add_receiver(to_server::SET_TAKE_DATA_V0, reliable)?,
            delete_take: protocol.add_receiver(to_server::DELETE_TAKE, reliable)?,

            protocol,
        })
    }

    #[must_use]
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// The connected companion, if any.
    #[must_use]
    pub fn remote(&self) -> Option<RemoteId> {
        self.protocol.remote()
    }

    /// Binds to `remote` and sends it the message table.
    ///
    /// # Errors
    ///
    /// Any error from [`send_table`].
    pub fn accept(&self, network: Arc<dyn Network>, remote: RemoteId) -> Result<(), ProtocolError> {
        self.protocol.bind(network, remote);
        send_table(&self.protocol)
    }

    /// Forgets the current companion.
    pub fn disconnect(&self) {
        if let Some(_remote) = self.protocol.remote() {
            info!(remote = %_remote, "companion disconnected");
        }
        self.protocol.unbind();
    }

    /// Routes one network event.
    ///
    /// The first remote to connect is accepted; others are ignored while it
    /// stays connected. Messages from the accepted remote are dispatched to
    /// the control callbacks.
    ///
    /// # Errors
    ///
    /// Errors from [`accept`](Self::accept) or [`receive`](Self::receive).
    pub fn handle(
        &self,
        network: &Arc<dyn Network>,
        event: &NetworkEvent,
    ) -> Result<(), ProtocolError> {
        let current = self.protocol.remote();
        match event {
            NetworkEvent::Connected(remote) if current.is_none() => {
                self.accept(Arc::clone(network), *remote)
            }
            NetworkEvent::Connected(_remote) => {
                debug!(remote = %_remote, "companion already connected, ignoring");
                Ok(())
            }
            NetworkEvent::Disconnected(remote) if current == Some(*remote) => {
                self.disconnect();
                Ok(())
            }
            NetworkEvent::Message(message) if current == Some(message.remote()) => {
                self.receive(message)
            }
            _ => Ok(()),
        }
    }

    /// Dispatches one message from the companion.
    ///
    /// # Errors
    ///
    /// See [`Protocol::receive`]. The message is dropped and logged.
    pub fn receive(&self, message: &Message) -> Result<(), ProtocolError> {
        self.protocol.receive(message)
    }

    /// Starts a session: clears remembered state, then sends `Initialize`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::HandshakeIncomplete`] before [`accept`](Self::accept),
    /// or a transport error.
    pub fn send_initialize(&self) -> Result<(), ProtocolError> {
        self.protocol.reset();
        self.initialize.send()
    }

    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize).
    pub fn send_end_session(&self) -> Result<(), ProtocolError> {
        self.end_session.send()
    }

    /// Returns `Ok(false)` when `state` equals the last state sent.
    ///
    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize).
    pub fn send_server_state(&self, state: ServerState) -> Result<bool, ProtocolError> {
        self.server_state.send(&state)
    }

    /// Returns `Ok(false)` when `state` equals the last state sent.
    ///
    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize).
    pub fn send_player_state(&self, state: PlayerState) -> Result<bool, ProtocolError> {
        self.player_state.send(&state)
    }

    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize).
    pub fn send_frame_rate(&self, rate: FrameRate) -> Result<bool, ProtocolError> {
        self.frame_rate.send(&rate)
    }

    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize), plus JSON errors.
    pub fn send_take_list(&self, takes: &[TakeDescriptor]) -> Result<(), ProtocolError> {
        self.take_list.send(&takes.to_vec()).map(|_| ())
    }

    /// `None` clears the selection.
    ///
    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize).
    pub fn send_selected_take(&self, take: Option<TakeId>) -> Result<(), ProtocolError> {
        self.selected_take
            .send(&take.unwrap_or(TakeId::NIL))
            .map(|_| ())
    }

    /// # Errors
    ///
    /// As for [`send_initialize`](Self::send_initialize).
    pub fn send_next_take_name(&self, name: &str) -> Result<bool, ProtocolError> {
        self.next_take_name.send(&name.to_owned())
    }

    pub fn on_set_device_mode(
        &self,
        handler: impl Fn(DeviceMode) + Send + Sync + 'static,
    ) -> Subscription {
        self.set_device_mode.on_receive(move |mode| handler(*mode))
    }

    pub fn on_start_recording(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.start_recording.on_receive(handler)
    }

    pub fn on_stop_recording(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.stop_recording.on_receive(handler)
    }

    pub fn on_player_start(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.player_start.on_receive(handler)
    }

    pub fn on_player_stop(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.player_stop.on_receive(handler)
    }

    pub fn on_player_pause(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.player_pause.on_receive(handler)
    }

    /// `handler` receives the requested time in seconds from the start of
    /// the take.
    pub fn on_player_set_time(
        &self,
        handler: impl Fn(f64) + Send + Sync + 'static,
    ) -> Subscription {
        self.player_set_time.on_receive(move |time| handler(*time))
    }

    /// `handler` receives `None` when the companion clears the selection.
    pub fn on_set_selected_take(
        &self,
        handler: impl Fn(Option<TakeId>) + Send + Sync + 'static,
    ) -> Subscription {
        self.set_selected_take
            .on_receive(move |take| handler(take.non_nil()))
    }

    pub fn on_set_take_data(
        &self,
        handler: impl Fn(&TakeDescriptor) + Send + Sync + 'static,
    ) -> Subscription {
        self.set_take_data.on_receive(handler)
    }

    pub fn on_delete_take(&self, handler: impl Fn(TakeId) + Send + Sync + 'static) -> Subscription {
        self.delete_take.on_receive(move |take| handler(*take))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LoopbackNetwork;
    use crate::protocol::Direction;
    use std::time::Duration;

    #[test]
    fn table_lists_every_message() {
        let host = CompanionHost::new().unwrap();
        let descriptors = host.protocol().descriptors();
        assert_eq!(descriptors.len(), 18);
        assert_eq!(descriptors[0].id, to_client::INITIALIZE);
        assert!(
            descriptors
                .iter()
                .filter(|d| d.id.starts_with("CompanionApp_ToServer_"))
                .all(|d| d.direction == Direction::Receive)
        );
    }

    #[test]
    fn state_cannot_be_pushed_before_accept() {
        let host = CompanionHost::new().unwrap();
        assert!(matches!(
            host.send_server_state(ServerState::default()),
            Err(ProtocolError::HandshakeIncomplete)
        ));
    }

    #[test]
    fn first_connection_is_accepted_and_others_ignored() {
        let host = CompanionHost::new().unwrap();
        let (local, remote) = LoopbackNetwork::pair();
        let network: Arc<dyn Network> = Arc::new(local);

        for event in network.poll(Some(Duration::ZERO)).unwrap() {
            host.handle(&network, &event).unwrap();
        }
        assert_eq!(host.remote(), Some(remote.local_id()));
        assert!(host.protocol().is_handshake_complete());

        let stranger = RemoteId::generate();
        host.handle(&network, &NetworkEvent::Connected(stranger))
            .unwrap();
        assert_eq!(host.remote(), Some(remote.local_id()));

        host.handle(&network, &NetworkEvent::Disconnected(remote.local_id()))
            .unwrap();
        assert_eq!(host.remote(), None);
    }
}
