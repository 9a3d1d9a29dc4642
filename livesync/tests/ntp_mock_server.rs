//! NTP client and timecode source against an in-process SNTP server whose
//! clock runs five seconds ahead of ours.

use std::net::UdpSocket;
use std::sync::Once;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use livesync::net::TransportError;
use livesync::reference::ntp::{Mode, NtpClient, NtpPacket, NtpTimestamp};
use livesync::reference::{NtpTimecodeSource, TimecodeSource};
use livesync::source::SourceId;
use livesync::time::{FrameRate, StandardFrameRate};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        livesync::init_tracing();
    });
}

const SERVER_OFFSET: Duration = Duration::from_secs(5);
const TOLERANCE: Duration = Duration::from_millis(250);

/// Answers `replies` requests, optionally preceding each real reply with a
/// reply to some earlier request.
fn spawn_server(replies: usize, send_stale_first: bool) -> (String, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let addr = socket.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 128];
        for _ in 0..replies {
            let Ok((len, from)) = socket.recv_from(&mut buf) else {
                return;
            };
            let request = NtpPacket::from_bytes(&buf[..len]).unwrap();
            let server_now = SystemTime::now() + SERVER_OFFSET;

            let mut reply = NtpPacket::new();
            reply.set_mode(Mode::Server);
            reply.set_stratum(1);
            reply.set_reference_timestamp(NtpTimestamp::from_system_time(server_now));
            reply.set_receive_timestamp(NtpTimestamp::from_system_time(server_now));
            reply.set_transmit_timestamp(NtpTimestamp::from_system_time(server_now));

            if send_stale_first {
                // Claims the server is a day behind; must be ignored.
                let mut stale = reply;
                let yesterday = server_now - Duration::from_secs(86_400);
                stale.set_originate_timestamp(NtpTimestamp::from_system_time(
                    yesterday - SERVER_OFFSET,
                ));
                stale.set_receive_timestamp(NtpTimestamp::from_system_time(yesterday));
                stale.set_transmit_timestamp(NtpTimestamp::from_system_time(yesterday));
                socket.send_to(stale.as_bytes(), from).unwrap();
            }

            reply.set_originate_timestamp(request.transmit_timestamp());
            socket.send_to(reply.as_bytes(), from).unwrap();
        }
    });
    (addr, handle)
}

fn distance(a: SystemTime, b: SystemTime) -> Duration {
    a.duration_since(b)
        .or_else(|_| b.duration_since(a))
        .unwrap_or_default()
}

#[test]
fn client_measures_server_offset() {
    init_test_tracing();
    let (server, handle) = spawn_server(1, false);

    let mut client = NtpClient::new();
    let sample = client.poll_time(&server, SystemTime::now()).unwrap();
    handle.join().unwrap();

    let expected = SERVER_OFFSET.as_nanos() as i64;
    assert!((sample.offset_nanos - expected).abs() < TOLERANCE.as_nanos() as i64);
    assert!(sample.round_trip < TOLERANCE);
    assert!(distance(sample.time, SystemTime::now() + SERVER_OFFSET) < TOLERANCE);
    assert!(client.is_connected());
}

#[test]
fn stale_reply_is_skipped() {
    init_test_tracing();
    let (server, handle) = spawn_server(1, true);

    let mut client = NtpClient::new();
    let sample = client.poll_time(&server, SystemTime::now()).unwrap();
    handle.join().unwrap();

    assert!(distance(sample.time, SystemTime::now() + SERVER_OFFSET) < TOLERANCE);
}

#[test]
fn source_reports_server_time_of_day() {
    init_test_tracing();
    let (server, handle) = spawn_server(1, false);
    let rate: FrameRate = StandardFrameRate::Fps24.into();

    let source = NtpTimecodeSource::new(SourceId::generate(), "mock", server).with_frame_rate(rate);
    source.force_update();
    source.wait_for_update();
    handle.join().unwrap();

    let now = source.current_time().unwrap();
    assert!(distance(now, SystemTime::now() + SERVER_OFFSET) < TOLERANCE);

    let (polled_rate, timecode) = source.try_poll_timecode().unwrap();
    assert_eq!(polled_rate, rate);
    assert!(!timecode.is_drop_frame());
    // A held reference is not re-queried.
    assert!(!source.is_updating());
}

#[test]
fn reinitialize_forgets_the_reference() {
    init_test_tracing();
    let (server, handle) = spawn_server(1, false);

    let source = NtpTimecodeSource::new(SourceId::generate(), "mock", server);
    source.force_update();
    source.wait_for_update();
    handle.join().unwrap();
    assert!(source.current_time().is_some());

    source.reinitialize();
    assert!(source.current_time().is_none());
}

#[test]
fn silent_server_yields_no_timecode() {
    init_test_tracing();
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = silent.local_addr().unwrap().to_string();

    let source = NtpTimecodeSource::new(SourceId::generate(), "silent", server)
        .with_timeout(Duration::from_millis(50));
    assert!(source.try_poll_timecode().is_none());
    source.wait_for_update();
    assert!(source.current_time().is_none());

    let mut client = NtpClient::new().with_timeout(Duration::from_millis(50));
    assert!(matches!(
        client.poll_time(&silent.local_addr().unwrap().to_string(), SystemTime::now()),
        Err(TransportError::Timeout)
    ));
}
