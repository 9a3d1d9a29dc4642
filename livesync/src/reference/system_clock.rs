use std::time::SystemTime;

use minstant::Instant;
use parking_lot::Mutex;

use super::TimecodeSource;
use super::ntp::source::utc_time_of_day;
use crate::source::{Registrable, SourceId};
use crate::time::{FrameRate, Timecode};

/// Which clock a [`SystemClockSource`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockKind {
    /// Seconds elapsed since the source was created.
    Monotonic,
    /// UTC time of day from the operating system.
    #[default]
    SystemClock,
}

/// Timecode generated from a local clock. Always available.
pub struct SystemClockSource {
    id: SourceId,
    name: String,
    frame_rate: Mutex<FrameRate>,
    kind: Mutex<ClockKind>,
    created: Instant,
}

impl SystemClockSource {
    #[must_use]
    pub fn new(mut id: SourceId, name: impl Into<String>, frame_rate: FrameRate) -> Self {
        id.ensure_valid();
        Self {
            id,
            name: name.into(),
            frame_rate: Mutex::new(frame_rate),
            kind: Mutex::new(ClockKind::default()),
            created: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_kind(self, kind: ClockKind) -> Self {
        *self.kind.lock() = kind;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ClockKind {
        *self.kind.lock()
    }

    pub fn set_kind(&self, kind: ClockKind) {
        *self.kind.lock() = kind;
    }

    pub fn set_frame_rate(&self, frame_rate: FrameRate) {
        *self.frame_rate.lock() = frame_rate;
    }
}

impl Registrable for SystemClockSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn friendly_name(&self) -> String {
        format!("System Clock ({})", self.name)
    }
}

impl TimecodeSource for SystemClockSource {
    fn frame_rate(&self) -> FrameRate {
        *self.frame_rate.lock()
    }

    fn try_poll_timecode(&self) -> Option<(FrameRate, Timecode)> {
        let rate = self.frame_rate();
        let seconds = match self.kind() {
            ClockKind::Monotonic => self.created.elapsed().as_secs_f64(),
            ClockKind::SystemClock => utc_time_of_day(SystemTime::now()),
        };
        Some((rate, Timecode::from_seconds(rate, seconds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_starts_near_zero() {
        let source = SystemClockSource::new(SourceId::generate(), "local", FrameRate::default())
            .with_kind(ClockKind::Monotonic);
        let (rate, timecode) = source.try_poll_timecode().unwrap();
        assert_eq!(rate, FrameRate::default());
        assert_eq!((timecode.hours(), timecode.minutes()), (0, 0));
    }

    #[test]
    fn system_clock_always_polls() {
        let source = SystemClockSource::new(SourceId::from(""), "local", FrameRate::default());
        assert!(source.id().is_valid());
        assert!(source.try_poll_timecode().is_some());
    }
}
