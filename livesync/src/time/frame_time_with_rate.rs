use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use super::{FrameRate, FrameTime, Timecode};

/// A [`FrameTime`] bound to the rate it counts in.
///
/// Comparison and arithmetic remap the right-hand side into the left-hand
/// side's rate, so values at different rates can be mixed freely.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FrameTimeWithRate {
    pub rate: FrameRate,
    pub time: FrameTime,
}

impl FrameTimeWithRate {
    #[must_use]
    pub const fn new(rate: FrameRate, time: FrameTime) -> Self {
        Self { rate, time }
    }

    #[must_use]
    pub fn from_timecode(rate: FrameRate, timecode: &Timecode) -> Self {
        timecode.to_frame_time_with_rate(rate)
    }

    #[must_use]
    pub fn from_seconds(rate: FrameRate, seconds: f64) -> Self {
        Self::new(rate, FrameTime::from_seconds(rate, seconds))
    }

    #[must_use]
    pub fn to_seconds(&self) -> f64 {
        self.time.to_seconds(self.rate)
    }

    #[must_use]
    pub fn to_timecode(&self) -> Timecode {
        Timecode::from_frame_time(self.rate, self.time)
    }

    /// The same instant counted at `rate`.
    #[must_use]
    pub fn remap(&self, rate: FrameRate) -> Self {
        Self::new(rate, self.time.remap(self.rate, rate))
    }
}

impl PartialEq for FrameTimeWithRate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrameTimeWithRate {}

impl Ord for FrameTimeWithRate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.remap(self.rate).time)
    }
}

impl PartialOrd for FrameTimeWithRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for FrameTimeWithRate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.rate, self.time + rhs.remap(self.rate).time)
    }
}

impl Sub for FrameTimeWithRate {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.rate, self.time - rhs.remap(self.rate).time)
    }
}

impl fmt::Display for FrameTimeWithRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.time, self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::StandardFrameRate;

    #[test]
    fn compares_across_rates() {
        let a = FrameTimeWithRate::new(StandardFrameRate::Fps24.into(), FrameTime::from_frame(24));
        let b = FrameTimeWithRate::new(StandardFrameRate::Fps48.into(), FrameTime::from_frame(48));
        let c = FrameTimeWithRate::new(StandardFrameRate::Fps48.into(), FrameTime::from_frame(49));
        assert_eq!(a, b);
        assert!(a < c);
    }

    #[test]
    fn add_remaps_rhs() {
        let a = FrameTimeWithRate::new(StandardFrameRate::Fps30.into(), FrameTime::from_frame(10));
        let b = FrameTimeWithRate::new(StandardFrameRate::Fps60.into(), FrameTime::from_frame(4));
        let sum = a + b;
        assert_eq!(sum.rate, FrameRate::from(StandardFrameRate::Fps30));
        assert_eq!(sum.time, FrameTime::from_frame(12));
        assert_eq!((a - b).time, FrameTime::from_frame(8));
    }

    #[test]
    fn timecode_round_trip() {
        let rate: FrameRate = StandardFrameRate::Fps25.into();
        let t = FrameTimeWithRate::new(rate, FrameTime::from_frame(90_000 + 7));
        let tc = t.to_timecode();
        assert_eq!(tc.to_string(), "01:00:00:07");
        assert_eq!(FrameTimeWithRate::from_timecode(rate, &tc), t);
    }
}
