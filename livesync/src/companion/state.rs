//! Fixed-layout state pushed from host to companion.

use std::fmt;

use crate::FixedLayout;
use crate::protocol::WireError;
use crate::protocol::layout::{combine_layout_hash, ensure_len, fnv1a};
use crate::time::FrameRate;

/// What the host device is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FixedLayout)]
#[repr(u8)]
pub enum DeviceMode {
    /// Neither streaming nor playing back.
    #[default]
    Inactive = 0,
    /// Ready to play recorded takes.
    Playback = 1,
    /// Receiving live data.
    LiveStream = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FixedLayout)]
#[repr(C)]
pub struct ServerState {
    pub recording: bool,
    pub mode: DeviceMode,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(mode {:?}, recording {})", self.mode, self.recording)
    }
}

/// Playback state of the host's take player. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, FixedLayout)]
#[repr(C)]
pub struct PlayerState {
    pub playing: bool,
    pub time: f64,
    pub duration: f64,
    pub has_timeline: bool,
}

/// `[numerator:4][denominator:4][drop_frame:1]`
impl FixedLayout for FrameRate {
    const SIZE: usize = 9;
    const LAYOUT_HASH: u64 = combine_layout_hash(
        combine_layout_hash(fnv1a(b"FrameRate"), <u32 as FixedLayout>::LAYOUT_HASH),
        <bool as FixedLayout>::LAYOUT_HASH,
    );

    fn write_to(&self, buf: &mut [u8]) -> Result<(), WireError> {
        ensure_len(buf.len(), Self::SIZE)?;
        self.numerator().write_to(&mut buf[0..4])?;
        self.denominator().write_to(&mut buf[4..8])?;
        self.is_drop_frame().write_to(&mut buf[8..9])
    }

    fn read_from(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf.len(), Self::SIZE)?;
        let numerator = u32::read_from(&buf[0..4])?;
        let denominator = u32::read_from(&buf[4..8])?;
        let drop_frame = bool::read_from(&buf[8..9])?;
        Self::with_drop_frame(numerator, denominator, drop_frame).map_err(|_| {
            WireError::InvalidDiscriminant {
                name: "FrameRate",
                value: i64::from(numerator),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_state_is_two_bytes() {
        let state = ServerState {
            recording: true,
            mode: DeviceMode::LiveStream,
        };
        assert_eq!(ServerState::SIZE, 2);
        assert_eq!(state.to_bytes().unwrap(), vec![1, 2]);
        assert_eq!(ServerState::read_from(&[1, 2]).unwrap(), state);
    }

    #[test]
    fn unknown_device_mode_is_rejected() {
        assert!(matches!(
            ServerState::read_from(&[0, 9]),
            Err(WireError::InvalidDiscriminant { value: 9, .. })
        ));
    }

    #[test]
    fn player_state_packs_without_padding() {
        let state = PlayerState {
            playing: true,
            time: 2.5,
            duration: 10.0,
            has_timeline: false,
        };
        let bytes = state.to_bytes().unwrap();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[1..9], &2.5f64.to_le_bytes());
        assert_eq!(PlayerState::read_from(&bytes).unwrap(), state);
    }

    #[test]
    fn frame_rate_keeps_drop_flag() {
        let rate = FrameRate::with_drop_frame(30000, 1001, true).unwrap();
        let bytes = rate.to_bytes().unwrap();
        assert_eq!(FrameRate::read_from(&bytes).unwrap(), rate);

        let mut zero = bytes.clone();
        zero[4..8].fill(0);
        assert!(FrameRate::read_from(&zero).is_err());
    }
}
