use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use super::{FrameRate, Subframe};

/// An exact position on a timeline as whole frames plus a [`Subframe`].
///
/// The frame rate is implicit. Arithmetic between two frame times only makes
/// sense when they share a rate; use [`FrameTime::remap`] to move between
/// rates, or [`FrameTimeWithRate`](super::FrameTimeWithRate) to carry the
/// rate along.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameTime {
    frame: i32,
    subframe: Subframe,
}

impl FrameTime {
    pub const ZERO: Self = Self::from_frame(0);
    pub const MAX: Self = Self {
        frame: i32::MAX,
        subframe: match Subframe::new(
            Subframe::DEFAULT_RESOLUTION - 1,
            Subframe::DEFAULT_RESOLUTION,
        ) {
            Ok(subframe) => subframe,
            Err(_) => Subframe::ZERO,
        },
    };
    pub const MIN: Self = Self::from_frame(i32::MIN);

    #[must_use]
    pub const fn new(frame: i32, subframe: Subframe) -> Self {
        Self { frame, subframe }
    }

    #[must_use]
    pub const fn from_frame(frame: i32) -> Self {
        Self {
            frame,
            subframe: Subframe::ZERO,
        }
    }

    /// Splits a frame count into whole frames (floor) and a subframe at the
    /// default resolution. Values outside the `i32` range saturate.
    #[must_use]
    pub fn from_f64(frames: f64) -> Self {
        if frames.is_nan() {
            return Self::ZERO;
        }
        let whole = frames.floor();
        if whole >= f64::from(i32::MAX) {
            return Self::from_frame(i32::MAX);
        }
        if whole < f64::from(i32::MIN) {
            return Self::MIN;
        }
        Self {
            frame: whole as i32,
            subframe: Subframe::from_fraction(frames - whole, Subframe::DEFAULT_RESOLUTION),
        }
    }

    /// Frame time reached after `seconds` at `rate`.
    #[must_use]
    pub fn from_seconds(rate: FrameRate, seconds: f64) -> Self {
        Self::from_f64(seconds * rate.as_f64())
    }

    #[must_use]
    pub const fn frame(&self) -> i32 {
        self.frame
    }

    #[must_use]
    pub const fn subframe(&self) -> Subframe {
        self.subframe
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        f64::from(self.frame) + self.subframe.as_f64()
    }

    #[must_use]
    pub fn to_seconds(&self, rate: FrameRate) -> f64 {
        self.as_f64() * rate.frame_interval()
    }

    /// Drops the subframe.
    #[must_use]
    pub const fn floor(&self) -> Self {
        Self::from_frame(self.frame)
    }

    /// Rounds up to the next whole frame unless already whole.
    #[must_use]
    pub const fn ceil(&self) -> Self {
        if self.subframe.is_zero() {
            Self::from_frame(self.frame)
        } else {
            Self::from_frame(self.frame.saturating_add(1))
        }
    }

    /// Rounds to the nearest whole frame, halves rounding up.
    #[must_use]
    pub const fn round(&self) -> Self {
        let twice = self.subframe.value() as u32 * 2;
        if twice >= self.subframe.resolution() as u32 {
            Self::from_frame(self.frame.saturating_add(1))
        } else {
            Self::from_frame(self.frame)
        }
    }

    /// Rescales this time from `from` to `to`.
    ///
    /// Exact whenever the result lands on a representable subframe (for
    /// example 24 -> 48 or 60 -> 30); otherwise the subframe is truncated
    /// toward the earlier time. Out-of-range results saturate.
    #[must_use]
    pub fn remap(&self, from: FrameRate, to: FrameRate) -> Self {
        if from.numerator() == to.numerator() && from.denominator() == to.denominator() {
            return *self;
        }

        let resolution = i128::from(self.subframe.resolution());
        let ticks = i128::from(self.frame) * resolution + i128::from(self.subframe.value());

        let numer = ticks * i128::from(to.numerator()) * i128::from(from.denominator());
        let denom = resolution * i128::from(to.denominator()) * i128::from(from.numerator());

        let frame = numer.div_euclid(denom);
        let rem = numer.rem_euclid(denom);
        let value = rem * resolution / denom;

        Self::from_wide(frame, value as u16, self.subframe.resolution())
    }

    /// Adds whole frames, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add_frames(&self, frames: i32) -> Option<Self> {
        match self.frame.checked_add(frames) {
            Some(frame) => Some(Self {
                frame,
                subframe: self.subframe,
            }),
            None => None,
        }
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let (resolution, lhs, rhs) = Self::common_ticks(self, rhs);
        Self::checked_from_ticks(lhs + rhs, resolution)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let (resolution, lhs, rhs) = Self::common_ticks(self, rhs);
        Self::checked_from_ticks(lhs - rhs, resolution)
    }

    /// Expresses both operands as ticks at the finer of their resolutions.
    fn common_ticks(lhs: Self, rhs: Self) -> (u16, i128, i128) {
        let resolution = lhs.subframe.resolution().max(rhs.subframe.resolution());
        (resolution, lhs.ticks_at(resolution), rhs.ticks_at(resolution))
    }

    fn ticks_at(&self, resolution: u16) -> i128 {
        let own = u32::from(self.subframe.resolution());
        let target = u32::from(resolution);
        let value = if own == target {
            u32::from(self.subframe.value())
        } else {
            // Round to nearest; exact when one resolution divides the other.
            (u32::from(self.subframe.value()) * target + own / 2) / own
        };
        i128::from(self.frame) * i128::from(resolution) + i128::from(value)
    }

    fn checked_from_ticks(ticks: i128, resolution: u16) -> Option<Self> {
        let res = i128::from(resolution);
        let frame = i32::try_from(ticks.div_euclid(res)).ok()?;
        let value = ticks.rem_euclid(res) as u16;
        Some(Self {
            frame,
            subframe: Subframe::new(value, resolution).ok()?,
        })
    }

    fn saturating_from_ticks(ticks: i128, resolution: u16) -> Self {
        let res = i128::from(resolution);
        Self::from_wide(ticks.div_euclid(res), ticks.rem_euclid(res) as u16, resolution)
    }

    fn from_wide(frame: i128, value: u16, resolution: u16) -> Self {
        if frame > i128::from(i32::MAX) {
            return Self::MAX;
        }
        if frame < i128::from(i32::MIN) {
            return Self::MIN;
        }
        Self {
            frame: frame as i32,
            subframe: Subframe::new(value, resolution).unwrap_or(Subframe::ZERO),
        }
    }
}

impl Ord for FrameTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.frame
            .cmp(&other.frame)
            .then_with(|| self.subframe.cmp(&other.subframe))
    }
}

impl PartialOrd for FrameTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i32> for FrameTime {
    fn from(frame: i32) -> Self {
        Self::from_frame(frame)
    }
}

impl Add for FrameTime {
    type Output = Self;

    /// Saturating addition.
    fn add(self, rhs: Self) -> Self {
        let (resolution, lhs, rhs) = Self::common_ticks(self, rhs);
        Self::saturating_from_ticks(lhs + rhs, resolution)
    }
}

impl Sub for FrameTime {
    type Output = Self;

    /// Saturating subtraction.
    fn sub(self, rhs: Self) -> Self {
        let (resolution, lhs, rhs) = Self::common_ticks(self, rhs);
        Self::saturating_from_ticks(lhs - rhs, resolution)
    }
}

impl AddAssign for FrameTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for FrameTime {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Display for FrameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subframe.is_zero() {
            write!(f, "{}", self.frame)
        } else {
            write!(f, "{} + {}", self.frame, self.subframe)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::StandardFrameRate;

    fn sub(value: u16, resolution: u16) -> Subframe {
        Subframe::new(value, resolution).unwrap()
    }

    #[test]
    fn ordering_uses_frame_then_subframe() {
        let a = FrameTime::new(10, sub(1, 4));
        let b = FrameTime::new(10, sub(1, 2));
        let c = FrameTime::from_frame(11);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(FrameTime::new(3, sub(2, 4)), FrameTime::new(3, sub(1, 2)));
    }

    #[test]
    fn add_carries_subframes() {
        let a = FrameTime::new(1, sub(3, 4));
        let b = FrameTime::new(2, sub(1, 2));
        assert_eq!(a + b, FrameTime::new(4, sub(1, 4)));
    }

    #[test]
    fn sub_borrows_across_zero() {
        let a = FrameTime::new(0, sub(1, 4));
        let b = FrameTime::new(1, sub(1, 2));
        assert_eq!(a - b, FrameTime::new(-2, sub(3, 4)));
    }

    #[test]
    fn arithmetic_saturates() {
        let big = FrameTime::from_frame(i32::MAX);
        assert_eq!(big + FrameTime::from_frame(10), FrameTime::MAX);
        assert_eq!(
            FrameTime::MIN - FrameTime::from_frame(1),
            FrameTime::MIN
        );
        assert!(big.checked_add(FrameTime::from_frame(1)).is_none());
        assert_eq!(
            FrameTime::from_frame(5).checked_sub(FrameTime::from_frame(7)),
            Some(FrameTime::from_frame(-2))
        );
    }

    #[test]
    fn from_f64_floors_negative_values() {
        let t = FrameTime::from_f64(-1.25);
        assert_eq!(t.frame(), -2);
        assert!((t.subframe().as_f64() - 0.75).abs() < 1e-4);
    }

    #[test]
    fn floor_ceil_round() {
        let t = FrameTime::new(7, sub(1, 2));
        assert_eq!(t.floor(), FrameTime::from_frame(7));
        assert_eq!(t.ceil(), FrameTime::from_frame(8));
        assert_eq!(t.round(), FrameTime::from_frame(8));
        assert_eq!(FrameTime::new(7, sub(1, 4)).round(), FrameTime::from_frame(7));
        assert_eq!(FrameTime::from_frame(7).ceil(), FrameTime::from_frame(7));
    }

    #[test]
    fn remap_between_even_rates_is_exact() {
        let r24 = FrameRate::from(StandardFrameRate::Fps24);
        let r48 = FrameRate::from(StandardFrameRate::Fps48);
        let r60 = FrameRate::from(StandardFrameRate::Fps60);
        let r30 = FrameRate::from(StandardFrameRate::Fps30);

        assert_eq!(FrameTime::from_frame(10).remap(r24, r48), FrameTime::from_frame(20));
        assert_eq!(
            FrameTime::from_frame(21).remap(r60, r30),
            FrameTime::new(10, sub(1, 2))
        );
        assert_eq!(
            FrameTime::from_frame(-3).remap(r60, r30),
            FrameTime::new(-2, sub(1, 2))
        );
    }

    #[test]
    fn remap_ntsc_to_integer_rate() {
        let ntsc = FrameRate::from(StandardFrameRate::Fps29_97);
        let r30 = FrameRate::from(StandardFrameRate::Fps30);

        // 30000 frames at 29.97 last 1001 seconds, which is 30030 frames at 30.
        assert_eq!(
            FrameTime::from_frame(30000).remap(ntsc, r30),
            FrameTime::from_frame(30030)
        );
        // Remapping ignores the drop-frame flag.
        let ntsc_df = FrameRate::from(StandardFrameRate::Fps29_97Df);
        assert_eq!(
            FrameTime::from_frame(1234).remap(ntsc, ntsc_df),
            FrameTime::from_frame(1234)
        );
    }

    #[test]
    fn seconds_round_trip() {
        let rate = FrameRate::from(StandardFrameRate::Fps25);
        let t = FrameTime::from_seconds(rate, 2.0);
        assert_eq!(t, FrameTime::from_frame(50));
        assert!((t.to_seconds(rate) - 2.0).abs() < 1e-9);
    }
}
