//! SMPTE timecode labels.
//!
//! Conversion between a [`FrameTime`] and its `HH:MM:SS:FF` label uses only
//! integer arithmetic. For drop-frame rates the first `drop` labels of every
//! minute not divisible by ten are skipped, where `drop` is 2 at 29.97 and
//! 23.976 and 4 at 59.94. Labels wrap at 24 hours.
//!
//! Negative frame times get negative labels: every field carries the sign,
//! and the label displays as `-HH:MM:SS:FF`. Drop-frame skipping is applied
//! to the magnitude, so a negative label mirrors its positive counterpart.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{FrameRate, FrameTime, FrameTimeWithRate, Subframe, TimeError};

const MAX_HOURS: u32 = 24;

/// A timecode label, only meaningful together with the [`FrameRate`] it was
/// produced for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timecode {
    hours: i8,
    minutes: i8,
    seconds: i8,
    frames: i32,
    subframe: Subframe,
    drop_frame: bool,
}

/// Integer constants governing labels at one rate.
#[derive(Debug, Clone, Copy)]
struct Counting {
    nominal: i64,
    drop: i64,
    frames_per_minute: i64,
    frames_per_ten_minutes: i64,
    /// Frames counted in a day, after drop-frame skipping.
    frames_per_day: i64,
    /// Labels in a day, before drop-frame skipping.
    labels_per_day: i64,
}

impl Counting {
    fn new(rate: FrameRate) -> Self {
        let nominal = i64::from(rate.nominal_fps());
        if rate.is_drop_frame() {
            let drop = (nominal + 14) / 15;
            let frames_per_minute = nominal * 60 - drop;
            let frames_per_ten_minutes = nominal * 600 - drop * 9;
            Self {
                nominal,
                drop,
                frames_per_minute,
                frames_per_ten_minutes,
                frames_per_day: frames_per_ten_minutes * 6 * i64::from(MAX_HOURS),
                labels_per_day: nominal * 86_400,
            }
        } else {
            Self {
                nominal,
                drop: 0,
                frames_per_minute: nominal * 60,
                frames_per_ten_minutes: nominal * 600,
                frames_per_day: nominal * 86_400,
                labels_per_day: nominal * 86_400,
            }
        }
    }
}

impl Timecode {
    /// Builds a label from its fields.
    ///
    /// At drop-frame rates a label that does not exist (for example
    /// `00:01:00;00` at 29.97) is moved forward to the first valid frame of
    /// that minute.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::FieldOutOfRange`] when a field exceeds its range
    /// at `rate`.
    pub fn from_hmsf(
        rate: FrameRate,
        hours: u32,
        minutes: u32,
        seconds: u32,
        frames: u32,
    ) -> Result<Self, TimeError> {
        check_field("hours", hours, MAX_HOURS - 1)?;
        check_field("minutes", minutes, 59)?;
        check_field("seconds", seconds, 59)?;
        check_field("frames", frames, rate.nominal_fps() - 1)?;

        let counting = Counting::new(rate);
        let mut frames = frames;
        if rate.is_drop_frame() && seconds == 0 && minutes % 10 != 0 {
            frames = frames.max(counting.drop as u32);
        }

        Ok(Self {
            hours: hours as i8,
            minutes: minutes as i8,
            seconds: seconds as i8,
            frames: i32::try_from(frames).unwrap_or(i32::MAX),
            subframe: Subframe::ZERO,
            drop_frame: rate.is_drop_frame(),
        })
    }

    #[must_use]
    pub const fn with_subframe(self, subframe: Subframe) -> Self {
        Self { subframe, ..self }
    }

    /// The label shown at `time`, wrapping at 24 hours.
    ///
    /// A negative `time` yields a negative label within one day of zero.
    #[must_use]
    pub fn from_frame_time(rate: FrameRate, time: FrameTime) -> Self {
        let counting = Counting::new(rate);
        let frame = i64::from(time.frame());

        let mut n = frame.abs();
        if counting.drop > 0 {
            let tens = n / counting.frames_per_ten_minutes;
            let rem = n % counting.frames_per_ten_minutes;
            n += counting.drop * 9 * tens;
            if rem > counting.drop {
                n += counting.drop * ((rem - counting.drop) / counting.frames_per_minute);
            }
        }
        // Truncating remainders keep every field on the sign of `frame`.
        let n = (frame.signum() * n) % counting.labels_per_day;

        let total_seconds = n / counting.nominal;
        Self {
            hours: (total_seconds / 3600) as i8,
            minutes: ((total_seconds / 60) % 60) as i8,
            seconds: (total_seconds % 60) as i8,
            frames: (n % counting.nominal) as i32,
            subframe: time.subframe(),
            drop_frame: rate.is_drop_frame(),
        }
    }

    /// Frame time of this label at `rate`.
    #[must_use]
    pub fn to_frame_time(&self, rate: FrameRate) -> FrameTime {
        let counting = Counting::new(rate);
        let total_minutes = 60 * i64::from(self.hours) + i64::from(self.minutes);
        let total_seconds = total_minutes * 60 + i64::from(self.seconds);
        let mut n = total_seconds * counting.nominal + i64::from(self.frames);
        if counting.drop > 0 {
            n -= counting.drop * (total_minutes - total_minutes / 10);
        }
        // A day of frames fits in an i32 for every rate up to ~24 kHz.
        let frame = i32::try_from(n).unwrap_or(i32::MAX);
        FrameTime::new(frame, self.subframe)
    }

    /// The label shown `seconds` after midnight.
    #[must_use]
    pub fn from_seconds(rate: FrameRate, seconds: f64) -> Self {
        Self::from_frame_time(rate, FrameTime::from_seconds(rate, seconds))
    }

    #[must_use]
    pub fn to_frame_time_with_rate(&self, rate: FrameRate) -> FrameTimeWithRate {
        FrameTimeWithRate::new(rate, self.to_frame_time(rate))
    }

    /// The label `frames` frames later (or earlier) at `rate`.
    #[must_use]
    pub fn add_frames(&self, rate: FrameRate, frames: i32) -> Self {
        let time = self.to_frame_time(rate);
        let moved = FrameTime::new(time.frame().wrapping_add(frames), time.subframe());
        Self::from_frame_time(rate, moved)
    }

    /// Negative only for labels before zero.
    #[must_use]
    pub const fn hours(&self) -> i8 {
        self.hours
    }

    #[must_use]
    pub const fn minutes(&self) -> i8 {
        self.minutes
    }

    #[must_use]
    pub const fn seconds(&self) -> i8 {
        self.seconds
    }

    #[must_use]
    pub const fn frames(&self) -> i32 {
        self.frames
    }

    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.hours < 0 || self.minutes < 0 || self.seconds < 0 || self.frames < 0
    }

    #[must_use]
    pub const fn subframe(&self) -> Subframe {
        self.subframe
    }

    #[must_use]
    pub const fn is_drop_frame(&self) -> bool {
        self.drop_frame
    }
}

fn check_field(field: &'static str, value: u32, max: u32) -> Result<(), TimeError> {
    if value > max {
        return Err(TimeError::FieldOutOfRange { field, value, max });
    }
    Ok(())
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{sign}{:02}:{:02}:{:02}{sep}{:02}",
            self.hours.unsigned_abs(),
            self.minutes.unsigned_abs(),
            self.seconds.unsigned_abs(),
            self.frames.unsigned_abs()
        )
    }
}
