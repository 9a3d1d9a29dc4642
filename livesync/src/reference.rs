//! Timecode reference providers.
//!
//! A reference provider tells the synchronizer what time it is. Two are
//! provided: [`LtcTimecodeSource`] decodes SMPTE linear timecode from an
//! audio feed and [`NtpTimecodeSource`] derives time of day from a network
//! time server. [`ReferenceClock`] polls one of them once per tick and fills
//! gaps between fresh timecodes using the genlock pulse.

pub mod clock;
pub mod ltc;
pub mod ltc_source;
pub mod ntp;
pub mod system_clock;

pub use clock::ReferenceClock;
pub use ltc::{LtcDecoder, LtcFrame};
pub use ltc_source::LtcTimecodeSource;
pub use ntp::{NtpClient, NtpPacket, NtpTimecodeSource};
pub use system_clock::SystemClockSource;

use thiserror::Error;

use crate::source::Registrable;
use crate::time::{FrameRate, Timecode};

/// A registrable provider of the current timecode.
pub trait TimecodeSource: Registrable {
    /// Rate the provider counts timecode at.
    fn frame_rate(&self) -> FrameRate;

    /// The latest timecode, if the provider has one.
    ///
    /// Providers never fail here: an unreachable server or a silent audio
    /// input simply yields `None` until the provider recovers.
    fn try_poll_timecode(&self) -> Option<(FrameRate, Timecode)>;
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("channel {channel} out of range for {channels} channel audio")]
    InvalidChannel { channel: usize, channels: usize },
}
