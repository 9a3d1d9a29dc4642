//! A full companion session over an in-process network pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;

use livesync::companion::{
    CompanionClient, CompanionHost, DeviceMode, PlayerState, ServerState, TakeDescriptor,
};
use livesync::net::{LoopbackNetwork, Network, NetworkEvent};
use livesync::protocol::{ProtocolError, is_handshake};
use livesync::time::{FrameRate, StandardFrameRate};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        livesync::init_tracing();
    });
}

const POLL: Duration = Duration::from_millis(100);

struct Session {
    host: CompanionHost,
    host_link: Arc<LoopbackNetwork>,
    host_net: Arc<dyn Network>,
    client: CompanionClient,
    client_net: Arc<dyn Network>,
}

impl Session {
    fn start() -> Self {
        let (host_side, client_side) = LoopbackNetwork::pair();
        let host_link = Arc::new(host_side);
        let host_net: Arc<dyn Network> = host_link.clone();
        let client_net: Arc<dyn Network> = Arc::new(client_side);

        let host = CompanionHost::new().unwrap();
        for event in host_net.poll(Some(POLL)).unwrap() {
            host.handle(&host_net, &event).unwrap();
        }
        assert_eq!(host.remote(), Some(client_net.local_id()));

        let table = client_net
            .poll(Some(POLL))
            .unwrap()
            .into_iter()
            .find_map(|event| match event {
                NetworkEvent::Message(message) if is_handshake(&message) => Some(message),
                _ => None,
            })
            .unwrap();
        let client = CompanionClient::from_handshake(&table, Arc::clone(&client_net)).unwrap();

        Self {
            host,
            host_link,
            host_net,
            client,
            client_net,
        }
    }

    fn pump_client(&self) {
        for event in self.client_net.poll(Some(POLL)).unwrap() {
            let _ = self.client.handle(&event);
        }
    }

    fn pump_host(&self) {
        for event in self.host_net.poll(Some(POLL)).unwrap() {
            let _ = self.host.handle(&self.host_net, &event);
        }
    }
}

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    (Arc::clone(&log), log)
}

#[test]
fn client_mirrors_the_host_table() {
    init_test_tracing();
    let session = Session::start();

    let host = session.host.protocol();
    let client = session.client.protocol();
    assert_eq!(client.name(), host.name());
    assert_eq!(client.version(), host.version());
    assert_eq!(client.len(), host.len());
    assert!(client.is_read_only());
    assert_eq!(session.client.host(), Some(session.host_net.local_id()));

    for descriptor in host.descriptors() {
        let mirrored = client.descriptor(&descriptor.id).unwrap();
        assert_eq!(mirrored.ordinal, descriptor.ordinal);
        assert_ne!(mirrored.direction, descriptor.direction);
    }
}

#[test]
fn host_state_reaches_the_client() {
    init_test_tracing();
    let session = Session::start();
    let client = &session.client;

    let initialized = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&initialized);
    let _init = client.on_initialize(move || {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let (states, sink) = recorder();
    let _state = client.on_server_state(move |state| sink.lock().push(state)).unwrap();
    let (players, sink) = recorder();
    let _player = client.on_player_state(move |state| sink.lock().push(state)).unwrap();
    let (rates, sink) = recorder();
    let _rate = client.on_frame_rate(move |rate| sink.lock().push(rate)).unwrap();
    let (lists, sink) = recorder();
    let _takes = client
        .on_take_list(move |takes| sink.lock().push(takes.to_vec()))
        .unwrap();
    let (selected, sink) = recorder();
    let _selected = client
        .on_selected_take(move |take| sink.lock().push(take))
        .unwrap();
    let (names, sink) = recorder();
    let _name = client
        .on_next_take_name(move |name: &str| sink.lock().push(name.to_owned()))
        .unwrap();

    let host = &session.host;
    let recording = ServerState {
        recording: true,
        mode: DeviceMode::LiveStream,
    };
    let playing = PlayerState {
        playing: true,
        time: 1.5,
        duration: 30.0,
        has_timeline: true,
    };
    let rate: FrameRate = StandardFrameRate::Fps29_97Df.into();
    let take = TakeDescriptor::new("Scene 1", "Wide", 3, rate);

    host.send_initialize().unwrap();
    assert!(host.send_server_state(recording).unwrap());
    assert!(host.send_player_state(playing).unwrap());
    assert!(host.send_frame_rate(rate).unwrap());
    host.send_take_list(std::slice::from_ref(&take)).unwrap();
    host.send_selected_take(Some(take.id)).unwrap();
    host.send_selected_take(None).unwrap();
    assert!(host.send_next_take_name("Scene 1 Wide 4").unwrap());
    session.pump_client();

    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    assert_eq!(*states.lock(), vec![recording]);
    assert_eq!(*players.lock(), vec![playing]);
    assert_eq!(*rates.lock(), vec![rate]);
    assert_eq!(*lists.lock(), vec![vec![take.clone()]]);
    assert_eq!(*selected.lock(), vec![Some(take.id), None]);
    assert_eq!(*names.lock(), vec!["Scene 1 Wide 4".to_owned()]);
}

#[test]
fn unchanged_state_is_not_resent_until_initialize() {
    init_test_tracing();
    let session = Session::start();
    let (states, sink) = recorder();
    let _state = session
        .client
        .on_server_state(move |state| sink.lock().push(state))
        .unwrap();

    let idle = ServerState::default();
    let host = &session.host;
    assert!(host.send_server_state(idle).unwrap());
    assert!(!host.send_server_state(idle).unwrap());
    host.send_initialize().unwrap();
    assert!(host.send_server_state(idle).unwrap());
    session.pump_client();

    assert_eq!(states.lock().len(), 2);
}

#[test]
fn client_controls_reach_the_host() {
    init_test_tracing();
    let session = Session::start();
    let host = &session.host;

    let (modes, sink) = recorder();
    let _mode = host.on_set_device_mode(move |mode| sink.lock().push(mode));
    let starts = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&starts);
    let _start = host.on_start_recording(move || {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let (times, sink) = recorder();
    let _seek = host.on_player_set_time(move |time| sink.lock().push(time));
    let (selections, sink) = recorder();
    let _select = host.on_set_selected_take(move |take| sink.lock().push(take));
    let (edits, sink) = recorder();
    let _edit = host.on_set_take_data(move |take: &TakeDescriptor| sink.lock().push(take.clone()));
    let (deleted, sink) = recorder();
    let _delete = host.on_delete_take(move |take| sink.lock().push(take));

    let client = &session.client;
    let mut take = TakeDescriptor::new("Scene 2", "Close", 1, FrameRate::default());
    take.rating = 4;
    take.description = "keeper".into();

    client.set_device_mode(DeviceMode::Playback).unwrap();
    client.start_recording().unwrap();
    client.player_set_time(12.25).unwrap();
    client.set_selected_take(Some(take.id)).unwrap();
    client.set_selected_take(None).unwrap();
    client.set_take_data(&take).unwrap();
    client.delete_take(take.id).unwrap();
    session.pump_host();

    assert_eq!(*modes.lock(), vec![DeviceMode::Playback]);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(*times.lock(), vec![12.25]);
    assert_eq!(*selections.lock(), vec![Some(take.id), None]);
    assert_eq!(*edits.lock(), vec![take.clone()]);
    assert_eq!(*deleted.lock(), vec![take.id]);
}

#[test]
fn closing_the_link_ends_the_session() {
    init_test_tracing();
    let session = Session::start();
    let ended = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&ended);
    let _end = session
        .client
        .on_end_session(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    session.host.send_end_session().unwrap();
    session.host_link.close();
    session.pump_client();
    session.pump_host();

    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert_eq!(session.client.host(), None);
    assert_eq!(session.host.remote(), None);
    assert!(session.client.start_recording().is_err());
    assert!(matches!(
        session.host.send_server_state(ServerState::default()),
        Err(ProtocolError::HandshakeIncomplete)
    ));
}
