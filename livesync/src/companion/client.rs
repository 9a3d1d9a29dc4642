use std::sync::Arc;

use super::messages::{to_client, to_server};
use super::state::{DeviceMode, PlayerState, ServerState};
use super::take::{TakeDescriptor, TakeId};
use crate::event::{Subscribers, Subscription};
use crate::net::{Message, Network, NetworkEvent, RemoteId};
use crate::protocol::{
    BinaryReceiver, BinarySender, EventReceiver, EventSender, JsonReceiver, JsonSender, Protocol,
    ProtocolError, TextReceiver, accept_table,
};
use crate::time::FrameRate;
use crate::trace::{debug, info, warn};

/// Device-side endpoint of the companion protocol.
///
/// Built from the table the host sends on connect. Messages missing from
/// that table, as with an older host, are tolerated: their senders and
/// callbacks fail with [`ProtocolError::UnknownMessage`].
pub struct CompanionClient {
    protocol: Protocol,
    initialized: Arc<Subscribers<()>>,
    // Resets the protocol ahead of `initialized` handlers.
    _on_initialize: Option<Subscription>,

    end_session: Option<EventReceiver>,
    server_state: Option<BinaryReceiver<ServerState>>,
    player_state: Option<BinaryReceiver<PlayerState>>,
    frame_rate: Option<BinaryReceiver<FrameRate>>,
    take_list: Option<JsonReceiver<Vec<TakeDescriptor>>>,
    selected_take: Option<BinaryReceiver<TakeId>>,
    next_take_name: Option<TextReceiver>,

    set_device_mode: Option<BinarySender<DeviceMode>>,
    start_recording: Option<EventSender>,
    stop_recording: Option<EventSender>,
    player_start: Option<EventSender>,
    player_stop: Option<EventSender>,
    player_pause: Option<EventSender>,
    player_set_time: Option<BinarySender<f64>>,
    set_selected_take: Option<BinarySender<TakeId>>,
    set_take_data: Option<JsonSender<TakeDescriptor>>,
    delete_take: Option<BinarySender<TakeId>>,
}

/// Keeps a handle the host's table provides, logging the ones it lacks.
fn optional<T>(id: &str, lookup: Result<T, ProtocolError>) -> Option<T> {
    match lookup {
        Ok(handle) => Some(handle),
        Err(ProtocolError::UnknownMessage(_)) => {
            debug!(id, "message not offered by host");
            None
        }
        Err(_err) => {
            warn!(id, error = %_err, "message unusable, ignoring it");
            None
        }
    }
}

fn require<'a, T>(handle: &'a Option<T>, id: &str) -> Result<&'a T, ProtocolError> {
    handle
        .as_ref()
        .ok_or_else(|| ProtocolError::UnknownMessage(id.to_owned()))
}

impl CompanionClient {
    /// Builds the client from the host's handshake message and binds it to
    /// the host.
    ///
    /// # Errors
    ///
    /// Any error from [`accept_table`].
    pub fn from_handshake(
        message: &Message,
        network: Arc<dyn Network>,
    ) -> Result<Self, ProtocolError> {
        let protocol = accept_table(message, network)?;
        let initialized = Arc::new(Subscribers::new());

        let on_initialize = optional(
            to_client::INITIALIZE,
            protocol.event_receiver(to_client::INITIALIZE),
        )
        .map(|receiver| {
            let protocol = protocol.clone();
            let initialized = Arc::clone(&initialized);
            receiver.on_receive(move || {
                protocol.reset();
                initialized.emit(&());
            })
        });

        Ok(Self {
            initialized,
            _on_initialize: on_initialize,

            end_session: optional(
                to_client::END_SESSION,
                protocol.event_receiver(to_client::END_SESSION),
            ),
            server_state: optional(
                to_client::SERVER_STATE,
                protocol.receiver(to_client::SERVER_STATE),
            ),
            player_state: optional(
                to_client::PLAYER_STATE,
                protocol.receiver(to_client::PLAYER_STATE),
            ),
            frame_rate: optional(
                to_client::FRAME_RATE,
                protocol.receiver(to_client::FRAME_RATE),
            ),
            take_list: optional(
                to_client::TAKE_LIST_V0,
                protocol.receiver(to_client::TAKE_LIST_V0),
            ),
            selected_take: optional(
                to_client::SELECTED_TAKE,
                protocol.receiver(to_client::SELECTED_TAKE),
            ),
            next_take_name: optional(
                to_client::NEXT_TAKE_NAME,
                protocol.receiver(to_client::NEXT_TAKE_NAME),
            ),

            set_device_mode: optional(
                to_server::SET_DEVICE_MODE,
                protocol.sender(to_server::SET_DEVICE_MODE),
            ),
            start_recording: optional(
                to_server::START_RECORDING,
                protocol.event_sender(to_server::START_RECORDING),
            ),
            stop_recording: optional(
                to_server::STOP_RECORDING,
                protocol.event_sender(to_server::STOP_RECORDING),
            ),
            player_start: optional(
                to_server::PLAYER_START,
                protocol.event_sender(to_server::PLAYER_START),
            ),
            player_stop: optional(
                to_server::PLAYER_STOP,
                protocol.event_sender(to_server::PLAYER_STOP),
            ),
            player_pause: optional(
                to_server::PLAYER_PAUSE,
                protocol.event_sender(to_server::PLAYER_PAUSE),
            ),
            player_set_time: optional(
                to_server::PLAYER_SET_TIME,
                protocol.sender(to_server::PLAYER_SET_TIME),
            ),
            set_selected_take: optional(
                to_server::SET_SELECTED_TAKE,
                protocol.sender(to_server::SET_SELECTED_TAKE),
            ),
            set_take_data: optional(
                to_server::SET_TAKE_DATA_V0,
                protocol.sender(to_server::SET_TAKE_DATA_V0),
            ),
            delete_take: optional(
                to_server::DELETE_TAKE,
                protocol.sender(to_server::DELETE_TAKE),
            ),

            protocol,
        })
    }

    #[must_use]
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    #[must_use]
    pub fn host(&self) -> Option<RemoteId> {
        self.protocol.remote()
    }

    /// Routes one network event.
    ///
    /// Losing the host unbinds the client, after which every send fails.
    /// Messages from anyone else are ignored.
    ///
    /// # Errors
    ///
    /// Errors from [`receive`](Self::receive).
    pub fn handle(&self, event: &NetworkEvent) -> Result<(), ProtocolError> {
        let host = self.protocol.remote();
        match event {
            NetworkEvent::Disconnected(remote) if host == Some(*remote) => {
                info!(host = %remote, "companion host disconnected");
                self.protocol.unbind();
                Ok(())
            }
            NetworkEvent::Message(message) if host == Some(message.remote()) => {
                self.receive(message)
            }
            _ => Ok(()),
        }
    }

    /// Dispatches one message from the host.
    ///
    /// # Errors
    ///
    /// See [`Protocol::receive`]. The message is dropped and logged.
    pub fn receive(&self, message: &Message) -> Result<(), ProtocolError> {
        self.protocol.receive(message)
    }

    /// Called when the host starts a session, after remembered state has
    /// been cleared.
    pub fn on_initialize(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.initialized.subscribe(move |()| handler())
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_end_session(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.end_session, to_client::END_SESSION)?.on_receive(handler))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_server_state(
        &self,
        handler: impl Fn(ServerState) + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.server_state, to_client::SERVER_STATE)?
            .on_receive(move |state| handler(*state)))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_player_state(
        &self,
        handler: impl Fn(PlayerState) + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.player_state, to_client::PLAYER_STATE)?
            .on_receive(move |state| handler(*state)))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_frame_rate(
        &self,
        handler: impl Fn(FrameRate) + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.frame_rate, to_client::FRAME_RATE)?
            .on_receive(move |rate| handler(*rate)))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_take_list(
        &self,
        handler: impl Fn(&[TakeDescriptor]) + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.take_list, to_client::TAKE_LIST_V0)?
            .on_receive(move |takes: &Vec<TakeDescriptor>| handler(takes)))
    }

    /// `handler` receives `None` when the host clears the selection.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_selected_take(
        &self,
        handler: impl Fn(Option<TakeId>) + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.selected_take, to_client::SELECTED_TAKE)?
            .on_receive(move |take| handler(take.non_nil())))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not send it.
    pub fn on_next_take_name(
        &self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<Subscription, ProtocolError> {
        Ok(require(&self.next_take_name, to_client::NEXT_TAKE_NAME)?
            .on_receive(move |name: &String| handler(name)))
    }

    /// # Errors
    ///
    /// [`ProtocolError::UnknownMessage`] if the host does not accept it,
    /// or a send error.
    pub fn set_device_mode(&self, mode: DeviceMode) -> Result<(), ProtocolError> {
        require(&self.set_device_mode, to_server::SET_DEVICE_MODE)?
            .send(&mode)
            .map(|_| ())
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn start_recording(&self) -> Result<(), ProtocolError> {
        require(&self.start_recording, to_server::START_RECORDING)?.send()
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn stop_recording(&self) -> Result<(), ProtocolError> {
        require(&self.stop_recording, to_server::STOP_RECORDING)?.send()
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn player_start(&self) -> Result<(), ProtocolError> {
        require(&self.player_start, to_server::PLAYER_START)?.send()
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn player_stop(&self) -> Result<(), ProtocolError> {
        require(&self.player_stop, to_server::PLAYER_STOP)?.send()
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn player_pause(&self) -> Result<(), ProtocolError> {
        require(&self.player_pause, to_server::PLAYER_PAUSE)?.send()
    }

    /// Asks the host to seek to `time` seconds from the start of the take.
    ///
    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn player_set_time(&self, time: f64) -> Result<(), ProtocolError> {
        require(&self.player_set_time, to_server::PLAYER_SET_TIME)?
            .send(&time)
            .map(|_| ())
    }

    /// `None` clears the selection.
    ///
    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn set_selected_take(&self, take: Option<TakeId>) -> Result<(), ProtocolError> {
        require(&self.set_selected_take, to_server::SET_SELECTED_TAKE)?
            .send(&take.unwrap_or(TakeId::NIL))
            .map(|_| ())
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode), plus JSON errors.
    pub fn set_take_data(&self, take: &TakeDescriptor) -> Result<(), ProtocolError> {
        require(&self.set_take_data, to_server::SET_TAKE_DATA_V0)?
            .send(take)
            .map(|_| ())
    }

    /// # Errors
    ///
    /// As for [`set_device_mode`](Self::set_device_mode).
    pub fn delete_take(&self, take: TakeId) -> Result<(), ProtocolError> {
        require(&self.delete_take, to_server::DELETE_TAKE)?
            .send(&take)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::messages::{PROTOCOL_NAME, PROTOCOL_VERSION};
    use crate::net::{ChannelType, LoopbackNetwork};
    use crate::protocol::send_table;
    use std::time::Duration;

    /// A host offering only `Initialize` and `StartRecording`.
    fn minimal_host() -> (Protocol, Arc<dyn Network>, Arc<dyn Network>) {
        let (host_net, client_net) = LoopbackNetwork::pair();
        let client_id = client_net.local_id();
        let host_net: Arc<dyn Network> = Arc::new(host_net);
        let client_net: Arc<dyn Network> = Arc::new(client_net);

        let host = Protocol::new(PROTOCOL_NAME, PROTOCOL_VERSION);
        host.add_event_sender(to_client::INITIALIZE, ChannelType::ReliableOrdered)
            .unwrap();
        host.add_event_receiver(to_server::START_RECORDING, ChannelType::ReliableOrdered)
            .unwrap();
        host.bind(Arc::clone(&host_net), client_id);
        send_table(&host).unwrap();
        (host, host_net, client_net)
    }

    fn handshake(network: &Arc<dyn Network>) -> Message {
        network
            .poll(Some(Duration::from_millis(100)))
            .unwrap()
            .into_iter()
            .find_map(|event| match event {
                NetworkEvent::Message(message) => Some(message),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn missing_messages_fail_only_when_used() {
        let (_host, _host_net, client_net) = minimal_host();
        let message = handshake(&client_net);
        let client = CompanionClient::from_handshake(&message, Arc::clone(&client_net)).unwrap();

        client.start_recording().unwrap();
        assert!(matches!(
            client.stop_recording(),
            Err(ProtocolError::UnknownMessage(id)) if id == to_server::STOP_RECORDING
        ));
        assert!(client.on_server_state(|_| {}).is_err());
    }

    #[test]
    fn data_message_cannot_build_a_client() {
        let (_host, _host_net, client_net) = minimal_host();
        let table = handshake(&client_net);
        let message = Message::new(table.remote(), table.channel(), vec![0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            CompanionClient::from_handshake(&message, client_net),
            Err(ProtocolError::UnknownOrdinal(0))
        ));
    }
}
