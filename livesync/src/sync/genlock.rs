use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex};

use crate::time::{FrameRate, FrameTime, FrameTimeWithRate};
use crate::trace::{debug, warn};

/// State of a [`Genlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Stopped,
    Synchronized,
    NotSynchronized,
}

/// Something that produces a regular pulse at its sync rate.
pub trait SyncProvider: Send {
    fn sync_rate(&self) -> FrameRate;

    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}

    /// Blocks until the next pulse.
    ///
    /// Returns the number of pulses since the previous call (more than one
    /// when pulses were missed), or `None` when the signal was lost.
    fn wait_for_next_pulse(&mut self) -> Option<u32>;
}

impl<P: SyncProvider + ?Sized> SyncProvider for Box<P> {
    fn sync_rate(&self) -> FrameRate {
        (**self).sync_rate()
    }

    fn on_start(&mut self) {
        (**self).on_start();
    }

    fn on_stop(&mut self) {
        (**self).on_stop();
    }

    fn wait_for_next_pulse(&mut self) -> Option<u32> {
        (**self).wait_for_next_pulse()
    }
}

/// Tracks a [`SyncProvider`] and counts the pulses it drops.
#[derive(Debug)]
pub struct Genlock<P> {
    provider: P,
    status: SyncStatus,
    last_pulse_count_delta: Option<u32>,
    dropped_frame_count: u64,
}

impl<P: SyncProvider> Genlock<P> {
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            status: SyncStatus::Stopped,
            last_pulse_count_delta: None,
            dropped_frame_count: 0,
        }
    }

    /// Starts following the provider. No-op unless stopped.
    pub fn start(&mut self) {
        if self.status != SyncStatus::Stopped {
            return;
        }
        self.provider.on_start();
        self.status = SyncStatus::Synchronized;
        self.last_pulse_count_delta = None;
        self.dropped_frame_count = 0;
        debug!(rate = %self.provider.sync_rate(), "genlock started");
    }

    pub fn stop(&mut self) {
        if self.status == SyncStatus::Stopped {
            return;
        }
        self.provider.on_stop();
        self.status = SyncStatus::Stopped;
        self.last_pulse_count_delta = None;
        debug!("genlock stopped");
    }

    /// Waits for the provider's next pulse.
    ///
    /// Returns false while stopped or when the provider lost its signal.
    pub fn wait_for_next_pulse(&mut self) -> bool {
        if self.status == SyncStatus::Stopped {
            return false;
        }

        let Some(pulses) = self.provider.wait_for_next_pulse() else {
            self.status = SyncStatus::NotSynchronized;
            self.last_pulse_count_delta = None;
            return false;
        };

        if self.status == SyncStatus::Synchronized && pulses > 1 {
            let dropped = pulses - 1;
            self.dropped_frame_count += u64::from(dropped);
            warn!(dropped, total = self.dropped_frame_count, "genlock dropped frames");
        }

        self.status = SyncStatus::Synchronized;
        self.last_pulse_count_delta = Some(pulses);
        true
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    #[must_use]
    pub fn sync_rate(&self) -> FrameRate {
        self.provider.sync_rate()
    }

    #[must_use]
    pub fn last_pulse_count_delta(&self) -> Option<u32> {
        self.last_pulse_count_delta
    }

    #[must_use]
    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frame_count
    }

    /// Time covered by the last pulse delta, while synchronized.
    #[must_use]
    pub fn pulse_delta(&self) -> Option<FrameTimeWithRate> {
        if self.status != SyncStatus::Synchronized {
            return None;
        }
        let pulses = i32::try_from(self.last_pulse_count_delta?).ok()?;
        Some(FrameTimeWithRate::new(
            self.sync_rate(),
            FrameTime::from_frame(pulses),
        ))
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }
}

/// Pulses from the local monotonic clock at a fixed rate.
#[derive(Debug)]
pub struct FreeRunClock {
    rate: FrameRate,
    origin: Option<Instant>,
    last_pulse: u64,
}

impl FreeRunClock {
    #[must_use]
    pub fn new(rate: FrameRate) -> Self {
        Self {
            rate,
            origin: None,
            last_pulse: 0,
        }
    }

    pub fn set_rate(&mut self, rate: FrameRate) {
        self.rate = rate;
        self.origin = None;
        self.last_pulse = 0;
    }
}

impl SyncProvider for FreeRunClock {
    fn sync_rate(&self) -> FrameRate {
        self.rate
    }

    fn on_start(&mut self) {
        self.origin = None;
        self.last_pulse = 0;
    }

    fn wait_for_next_pulse(&mut self) -> Option<u32> {
        let interval = self.rate.frame_interval();
        let origin = *self.origin.get_or_insert_with(Instant::now);

        let target = self.last_pulse + 1;
        let deadline = origin + Duration::from_secs_f64(interval * target as f64);
        if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            std::thread::sleep(remaining);
        }

        let reached = (origin.elapsed().as_secs_f64() / interval).floor() as u64;
        let pulse = reached.max(target);
        let delta = pulse - self.last_pulse;
        self.last_pulse = pulse;
        u32::try_from(delta).ok()
    }
}

#[derive(Debug, Default)]
struct PulseState {
    pending: u32,
    lost: bool,
}

/// Pulses driven from outside, e.g. by a capture card callback.
#[derive(Debug)]
pub struct ManualPulse {
    rate: FrameRate,
    timeout: Option<Duration>,
    shared: Arc<(Mutex<PulseState>, Condvar)>,
}

/// Handle that fires pulses into a [`ManualPulse`].
#[derive(Debug, Clone)]
pub struct PulseTrigger {
    shared: Arc<(Mutex<PulseState>, Condvar)>,
}

impl ManualPulse {
    /// A provider that waits at most `timeout` for each pulse before
    /// reporting the signal lost; `None` waits forever.
    #[must_use]
    pub fn new(rate: FrameRate, timeout: Option<Duration>) -> (Self, PulseTrigger) {
        let shared = Arc::new((Mutex::new(PulseState::default()), Condvar::new()));
        let trigger = PulseTrigger {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                rate,
                timeout,
                shared,
            },
            trigger,
        )
    }
}

impl PulseTrigger {
    pub fn pulse(&self) {
        self.pulses(1);
    }

    pub fn pulses(&self, count: u32) {
        let (state, ready) = &*self.shared;
        let mut state = state.lock();
        state.pending = state.pending.saturating_add(count);
        state.lost = false;
        ready.notify_one();
    }

    /// Marks the signal as lost; the waiting side reports a failed pulse.
    pub fn lose_signal(&self) {
        let (state, ready) = &*self.shared;
        state.lock().lost = true;
        ready.notify_one();
    }
}

impl SyncProvider for ManualPulse {
    fn sync_rate(&self) -> FrameRate {
        self.rate
    }

    fn on_start(&mut self) {
        *self.shared.0.lock() = PulseState::default();
    }

    fn wait_for_next_pulse(&mut self) -> Option<u32> {
        let (state, ready) = &*self.shared;
        let mut state = state.lock();
        let deadline = self.timeout.map(|t| std::time::Instant::now() + t);

        while state.pending == 0 && !state.lost {
            match deadline {
                Some(deadline) => {
                    if ready.wait_until(&mut state, deadline).timed_out() && state.pending == 0 {
                        return None;
                    }
                }
                None => ready.wait(&mut state),
            }
        }

        if state.pending == 0 {
            state.lost = false;
            return None;
        }
        Some(std::mem::take(&mut state.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Scripted(Vec<Option<u32>>);

    impl SyncProvider for Scripted {
        fn sync_rate(&self) -> FrameRate {
            FrameRate::default()
        }

        fn wait_for_next_pulse(&mut self) -> Option<u32> {
            if self.0.is_empty() {
                None
            } else {
                self.0.remove(0)
            }
        }
    }

    #[test]
    fn stopped_genlock_never_pulses() {
        let mut genlock = Genlock::new(Scripted(vec![Some(1)]));
        assert!(!genlock.wait_for_next_pulse());
        assert_eq!(genlock.status(), SyncStatus::Stopped);
        assert!(genlock.pulse_delta().is_none());
    }

    #[test]
    fn counts_dropped_frames_only_while_synchronized() {
        let mut genlock = Genlock::new(Scripted(vec![Some(1), Some(3), None, Some(4), Some(2)]));
        genlock.start();

        assert!(genlock.wait_for_next_pulse());
        assert!(genlock.wait_for_next_pulse());
        assert_eq!(genlock.dropped_frame_count(), 2);
        assert_eq!(genlock.last_pulse_count_delta(), Some(3));

        assert!(!genlock.wait_for_next_pulse());
        assert_eq!(genlock.status(), SyncStatus::NotSynchronized);
        assert!(genlock.pulse_delta().is_none());

        // Recovering from lost signal does not count the gap as drops.
        assert!(genlock.wait_for_next_pulse());
        assert_eq!(genlock.dropped_frame_count(), 2);

        assert!(genlock.wait_for_next_pulse());
        assert_eq!(genlock.dropped_frame_count(), 3);
        assert_eq!(
            genlock.pulse_delta().map(|d| d.time),
            Some(FrameTime::from_frame(2))
        );
    }

    #[test]
    fn restart_clears_counters() {
        let mut genlock = Genlock::new(Scripted(vec![Some(5)]));
        genlock.start();
        genlock.wait_for_next_pulse();
        genlock.stop();
        assert_eq!(genlock.status(), SyncStatus::Stopped);
        genlock.start();
        assert_eq!(genlock.dropped_frame_count(), 0);
        assert_eq!(genlock.last_pulse_count_delta(), None);
    }

    #[test]
    fn free_run_clock_paces_pulses() {
        let rate = FrameRate::new(100, 1).unwrap();
        let mut genlock = Genlock::new(FreeRunClock::new(rate));
        genlock.start();
        let started = Instant::now();
        for _ in 0..5 {
            assert!(genlock.wait_for_next_pulse());
        }
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn manual_pulse_accumulates_and_times_out() {
        let (provider, trigger) =
            ManualPulse::new(FrameRate::default(), Some(Duration::from_millis(100)));
        let mut genlock = Genlock::new(provider);
        genlock.start();

        trigger.pulses(2);
        assert!(genlock.wait_for_next_pulse());
        assert_eq!(genlock.last_pulse_count_delta(), Some(2));

        assert!(!genlock.wait_for_next_pulse());
        assert_eq!(genlock.status(), SyncStatus::NotSynchronized);

        let remote = trigger.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            remote.pulse();
        });
        assert!(genlock.wait_for_next_pulse());
        handle.join().unwrap();

        trigger.lose_signal();
        assert!(!genlock.wait_for_next_pulse());
    }
}
