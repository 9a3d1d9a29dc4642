//! Rational time model.
//!
//! Every time value in the crate is exact: frame rates are reduced ratios of
//! `u32`s, frame times are an integer frame count plus a fixed-point
//! [`Subframe`], and timecode conversion (including SMPTE drop-frame) uses
//! integer arithmetic only. Floating point appears solely at the edges
//! (`from_seconds` / `to_seconds`).
//!
//! ```text
//!   FrameRate ──┐
//!               ├── FrameTimeWithRate ── Timecode (HH:MM:SS:FF / HH:MM:SS;FF)
//!   FrameTime ──┘
//!      └── Subframe (value / resolution)
//! ```

pub mod frame_rate;
pub mod frame_time;
pub mod frame_time_with_rate;
pub mod subframe;
pub mod timecode;

pub use frame_rate::{FrameRate, StandardFrameRate};
pub use frame_time::FrameTime;
pub use frame_time_with_rate::FrameTimeWithRate;
pub use subframe::Subframe;
pub use timecode::Timecode;

use thiserror::Error;

/// Invalid time value construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeError {
    /// A frame rate denominator of zero.
    #[error("frame rate denominator must be greater than zero")]
    ZeroDenominator,
    /// A frame rate numerator of zero.
    #[error("frame rate numerator must be greater than zero")]
    ZeroNumerator,
    /// Drop-frame requested for a ratio that does not qualify.
    #[error("{numerator}/{denominator} does not support drop-frame timecode")]
    NotDropFrameRate { numerator: u32, denominator: u32 },
    /// Subframe value outside `[0, resolution)` or a zero resolution.
    #[error("subframe {value} is invalid for resolution {resolution}")]
    InvalidSubframe { value: u32, resolution: u32 },
    /// A timecode field exceeded its range.
    #[error("timecode {field} {value} exceeds maximum {max}")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

/// Greatest common divisor.
pub(crate) const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
