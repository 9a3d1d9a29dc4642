use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use minstant::Instant;
use parking_lot::Mutex;

use super::client::NtpClient;
use super::packet::unix_nanos;
use crate::reference::TimecodeSource;
use crate::source::{Registrable, SourceId};
use crate::time::{FrameRate, StandardFrameRate, Timecode};
use crate::trace::{debug, warn};

pub const DEFAULT_SERVER: &str = "pool.ntp.org";

const SECONDS_PER_DAY: i128 = 86_400;
const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Server time paired with the local instant it was measured at.
#[derive(Debug, Clone, Copy)]
struct ReferenceTime {
    server: SystemTime,
    measured_at: Instant,
}

struct Shared {
    id: SourceId,
    name: String,
    frame_rate: Mutex<FrameRate>,
    server: Mutex<String>,
    client: Mutex<NtpClient>,
    reference: Mutex<Option<ReferenceTime>>,
    in_flight: AtomicBool,
    /// Bumped on reinitialisation so stale polls are discarded.
    generation: AtomicU64,
}

impl Shared {
    fn current_time(&self) -> Option<SystemTime> {
        let reference = (*self.reference.lock())?;
        Some(reference.server + reference.measured_at.elapsed())
    }

    fn poll(&self, generation: u64) {
        let server = self.server.lock().clone();
        let client_time = self.current_time().unwrap_or_else(SystemTime::now);

        let result = self.client.lock().poll_time(&server, client_time);
        let stale = self.generation.load(Ordering::Acquire) != generation;

        match result {
            Ok(sample) if !stale => {
                *self.reference.lock() = Some(ReferenceTime {
                    server: sample.time,
                    measured_at: Instant::now(),
                });
                debug!(server = %server, offset_ns = sample.offset_nanos, "ntp reference updated");
            }
            // Failures were already logged by the client.
            Ok(_) | Err(_) => {}
        }

        if stale {
            self.client.lock().disconnect();
        }
    }
}

/// Time-of-day timecode derived from a network time server.
///
/// The first poll after construction (or after
/// [`reinitialize`](Self::reinitialize)) queries the server on a worker
/// thread. Between polls the last server time is extrapolated with the local
/// monotonic clock. At most one query is in flight at a time and the tick
/// thread never waits on the network.
pub struct NtpTimecodeSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NtpTimecodeSource {
    #[must_use]
    pub fn new(mut id: SourceId, name: impl Into<String>, server: impl Into<String>) -> Self {
        id.ensure_valid();
        Self {
            shared: Arc::new(Shared {
                id,
                name: name.into(),
                frame_rate: Mutex::new(StandardFrameRate::Fps24.into()),
                server: Mutex::new(server.into()),
                client: Mutex::new(NtpClient::new()),
                reference: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_frame_rate(self, frame_rate: FrameRate) -> Self {
        *self.shared.frame_rate.lock() = frame_rate;
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        {
            let mut client = self.shared.client.lock();
            *client = std::mem::take(&mut *client).with_timeout(timeout);
        }
        self
    }

    pub fn set_frame_rate(&self, frame_rate: FrameRate) {
        *self.shared.frame_rate.lock() = frame_rate;
    }

    #[must_use]
    pub fn server(&self) -> String {
        self.shared.server.lock().clone()
    }

    /// Points the source at another server and forgets the current time.
    pub fn set_server(&self, server: impl Into<String>) {
        *self.shared.server.lock() = server.into();
        self.reinitialize();
    }

    /// Starts a query now, unless one is already running.
    pub fn force_update(&self) {
        self.request_update();
    }

    /// Forgets the reference time so the next tick queries the server again.
    ///
    /// A query already in flight completes but its result is discarded.
    pub fn reinitialize(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        *self.shared.reference.lock() = None;
        if let Some(mut client) = self.shared.client.try_lock() {
            client.disconnect();
        }
    }

    /// Queries the server if no reference time is held yet.
    pub fn update(&self) {
        if self.shared.reference.lock().is_none() {
            self.request_update();
        }
    }

    /// Extrapolated server time, if a query has succeeded.
    #[must_use]
    pub fn current_time(&self) -> Option<SystemTime> {
        self.shared.current_time()
    }

    /// True while a query is running.
    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Blocks until the running query, if any, has finished.
    pub fn wait_for_update(&self) {
        if let Some(handle) = self.worker.lock().take()
            && !join_worker(handle)
        {
            self.shared.in_flight.store(false, Ordering::Release);
        }
    }

    fn request_update(&self) {
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            join_worker(previous);
        }

        let shared = Arc::clone(&self.shared);
        let generation = shared.generation.load(Ordering::Acquire);
        let spawned = thread::Builder::new()
            .name("livesync-ntp".into())
            .spawn(move || {
                shared.poll(generation);
                shared.in_flight.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(_err) => {
                warn!(error = %_err, "failed to spawn ntp worker");
                self.shared.in_flight.store(false, Ordering::Release);
            }
        }
    }
}

/// Joins a finished or running query, returning false if it panicked.
fn join_worker(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_panic) => {
            warn!("ntp worker panicked");
            false
        }
    }
}

impl Drop for NtpTimecodeSource {
    fn drop(&mut self) {
        self.wait_for_update();
    }
}

impl Registrable for NtpTimecodeSource {
    fn id(&self) -> SourceId {
        self.shared.id.clone()
    }

    fn friendly_name(&self) -> String {
        format!("NTP ({})", self.shared.name)
    }
}

impl TimecodeSource for NtpTimecodeSource {
    fn frame_rate(&self) -> FrameRate {
        *self.shared.frame_rate.lock()
    }

    fn try_poll_timecode(&self) -> Option<(FrameRate, Timecode)> {
        self.update();
        let time = self.current_time()?;
        let rate = self.frame_rate();
        Some((rate, Timecode::from_seconds(rate, utc_time_of_day(time))))
    }
}

/// Seconds since midnight UTC.
#[must_use]
pub fn utc_time_of_day(time: SystemTime) -> f64 {
    let nanos = unix_nanos(time).rem_euclid(SECONDS_PER_DAY * NANOS_PER_SECOND);
    nanos as f64 / NANOS_PER_SECOND as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn panicked_worker_is_reported_not_propagated() {
        let clean = thread::spawn(|| {});
        assert!(join_worker(clean));

        let failed = thread::spawn(|| panic!("query failed"));
        assert!(!join_worker(failed));
    }

    #[test]
    fn time_of_day_wraps_at_midnight() {
        let time = UNIX_EPOCH + Duration::from_secs(3 * 86_400 + 3_600);
        assert_eq!(utc_time_of_day(time), 3_600.0);
        let before = UNIX_EPOCH - Duration::from_secs(60);
        assert_eq!(utc_time_of_day(before), 86_340.0);
    }

    #[test]
    fn unreachable_server_yields_no_timecode() {
        let source = NtpTimecodeSource::new(SourceId::generate(), "studio", "")
            .with_timeout(Duration::from_millis(20));
        assert!(source.try_poll_timecode().is_none());
        source.wait_for_update();
        assert!(source.try_poll_timecode().is_none());
        assert_eq!(source.frame_rate(), FrameRate::default());
        assert!(source.friendly_name().starts_with("NTP"));
    }

    #[test]
    fn reinitialize_drops_reference() {
        let source = NtpTimecodeSource::new(SourceId::generate(), "studio", DEFAULT_SERVER);
        *source.shared.reference.lock() = Some(ReferenceTime {
            server: UNIX_EPOCH + Duration::from_secs(3_600),
            measured_at: Instant::now(),
        });
        let (_, timecode) = source.try_poll_timecode().unwrap();
        assert_eq!(timecode.hours(), 1);

        source.reinitialize();
        assert!(source.current_time().is_none());
    }
}
