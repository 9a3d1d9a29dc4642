//! SNTP packet layout.
//!
//! ```text
//! ┌──┬─────┬─────┬─────────┬─────────┬───────────┐
//! │LI│ VN  │Mode │ Stratum │  Poll   │ Precision │   byte 0..4
//! ├──┴─────┴─────┴─────────┴─────────┴───────────┤
//! │ Root Delay (16.16 signed seconds)            │   4..8
//! │ Root Dispersion (16.16 unsigned seconds)     │   8..12
//! │ Reference Identifier                         │   12..16
//! │ Reference Timestamp (32.32)                  │   16..24
//! │ Originate Timestamp (32.32)                  │   24..32
//! │ Receive Timestamp (32.32)                    │   32..40
//! │ Transmit Timestamp (32.32)                   │   40..48
//! └──────────────────────────────────────────────┘
//! ```
//!
//! All fields are big-endian. Timestamps count seconds since 1900-01-01.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::protocol::WireError;
use crate::protocol::layout::ensure_len;

pub const PACKET_LEN: usize = 48;
pub const CURRENT_VERSION: u8 = 4;
pub const NTP_PORT: u16 = 123;

/// Seconds between 1900-01-01 and 1970-01-01.
pub const UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeapIndicator {
    NoWarning = 0,
    LastMinuteHas61Seconds = 1,
    LastMinuteHas59Seconds = 2,
    AlarmCondition = 3,
}

impl From<u8> for LeapIndicator {
    fn from(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::NoWarning,
            1 => Self::LastMinuteHas61Seconds,
            2 => Self::LastMinuteHas59Seconds,
            _ => Self::AlarmCondition,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Reserved,
    SymmetricActive,
    SymmetricPassive,
    Client,
    Server,
    Broadcast,
    Control,
    Private,
}

impl From<u8> for Mode {
    fn from(v: u8) -> Self {
        match v & 0b111 {
            1 => Self::SymmetricActive,
            2 => Self::SymmetricPassive,
            3 => Self::Client,
            4 => Self::Server,
            5 => Self::Broadcast,
            6 => Self::Control,
            7 => Self::Private,
            _ => Self::Reserved,
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Reserved => 0,
            Mode::SymmetricActive => 1,
            Mode::SymmetricPassive => 2,
            Mode::Client => 3,
            Mode::Server => 4,
            Mode::Broadcast => 5,
            Mode::Control => 6,
            Mode::Private => 7,
        }
    }
}

/// A 64 bit NTP timestamp: 32 bits of seconds since 1900 and 32 bits of
/// binary fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTimestamp(u64);

impl NtpTimestamp {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[must_use]
    pub const fn fraction(self) -> u32 {
        self.0 as u32
    }

    /// Converts from nanoseconds since the Unix epoch.
    ///
    /// Times outside the current NTP era wrap modulo 2^32 seconds.
    #[must_use]
    pub fn from_unix_nanos(nanos: i128) -> Self {
        let ntp_nanos = nanos + i128::from(UNIX_EPOCH_OFFSET) * NANOS_PER_SECOND as i128;
        let seconds = ntp_nanos.div_euclid(NANOS_PER_SECOND as i128) as u64 & 0xFFFF_FFFF;
        let sub = ntp_nanos.rem_euclid(NANOS_PER_SECOND as i128) as u128;
        let fraction = ((sub << 32) / NANOS_PER_SECOND) as u64;
        Self((seconds << 32) | fraction)
    }

    /// Nanoseconds since the Unix epoch, assuming the current NTP era.
    #[must_use]
    pub fn to_unix_nanos(self) -> i128 {
        let seconds = i128::from(self.seconds()) - i128::from(UNIX_EPOCH_OFFSET);
        let sub = (u128::from(self.fraction()) * NANOS_PER_SECOND) >> 32;
        seconds * NANOS_PER_SECOND as i128 + sub as i128
    }

    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_unix_nanos(unix_nanos(time))
    }

    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        system_time_from_unix_nanos(self.to_unix_nanos())
    }
}

impl fmt::Display for NtpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08x}", self.seconds(), self.fraction())
    }
}

/// Signed nanoseconds between the Unix epoch and `time`.
#[must_use]
pub fn unix_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    }
}

#[must_use]
pub fn system_time_from_unix_nanos(nanos: i128) -> SystemTime {
    let magnitude = Duration::from_nanos(nanos.unsigned_abs().min(u128::from(u64::MAX)) as u64);
    if nanos >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

/// A 48 byte SNTP packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NtpPacket {
    bytes: [u8; PACKET_LEN],
}

impl NtpPacket {
    /// An empty version 4 client request.
    #[must_use]
    pub fn new() -> Self {
        let mut packet = Self {
            bytes: [0; PACKET_LEN],
        };
        packet.set_version(CURRENT_VERSION);
        packet.set_mode(Mode::Client);
        packet
    }

    /// A client request stamped with `transmit`.
    #[must_use]
    pub fn client_request(transmit: NtpTimestamp) -> Self {
        let mut packet = Self::new();
        packet.set_transmit_timestamp(transmit);
        packet
    }

    /// Parses the first [`PACKET_LEN`] bytes of a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::BufferTooSmall`] for short datagrams.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf.len(), PACKET_LEN)?;
        let mut bytes = [0; PACKET_LEN];
        bytes.copy_from_slice(&buf[..PACKET_LEN]);
        Ok(Self { bytes })
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.bytes
    }

    /// Zeroes every field, keeping version 4 client mode.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub fn leap_indicator(&self) -> LeapIndicator {
        LeapIndicator::from(self.bytes[0] >> 6)
    }

    pub fn set_leap_indicator(&mut self, leap: LeapIndicator) {
        self.set_bits(0, 0xC0, (leap as u8) << 6);
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        (self.bytes[0] & 0x38) >> 3
    }

    pub fn set_version(&mut self, version: u8) {
        self.set_bits(0, 0x38, version << 3);
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from(self.bytes[0])
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.set_bits(0, 0x07, u8::from(mode));
    }

    #[must_use]
    pub fn stratum(&self) -> u8 {
        self.bytes[1]
    }

    pub fn set_stratum(&mut self, stratum: u8) {
        self.bytes[1] = stratum;
    }

    /// Maximum interval between messages, as a log2 of seconds.
    #[must_use]
    pub fn poll_exponent(&self) -> i8 {
        self.bytes[2] as i8
    }

    /// Maximum interval between messages in seconds.
    #[must_use]
    pub fn poll_interval(&self) -> f64 {
        f64::from(self.poll_exponent()).exp2()
    }

    /// Stores `seconds` as the nearest power of two, clamped to 2^4..2^17.
    pub fn set_poll_interval(&mut self, seconds: f64) {
        let exponent = seconds.log2().round().clamp(4.0, 17.0) as i8;
        self.bytes[2] = exponent as u8;
    }

    /// Clock precision, as a log2 of seconds.
    #[must_use]
    pub fn precision_exponent(&self) -> i8 {
        self.bytes[3] as i8
    }

    /// Clock precision in seconds.
    #[must_use]
    pub fn precision(&self) -> f64 {
        f64::from(self.precision_exponent()).exp2()
    }

    /// Stores `seconds` as the nearest power of two, clamped to 2^-20..2^-6.
    pub fn set_precision(&mut self, seconds: f64) {
        let exponent = seconds.log2().round().clamp(-20.0, -6.0) as i8;
        self.bytes[3] = exponent as u8;
    }

    /// Round trip delay to the primary reference, in seconds.
    #[must_use]
    pub fn root_delay(&self) -> f64 {
        f64::from(self.u32_at(4) as i32) / 65536.0
    }

    pub fn set_root_delay(&mut self, seconds: f64) {
        self.set_u32_at(4, (seconds * 65536.0) as i32 as u32);
    }

    /// Maximum error relative to the primary reference, in seconds.
    #[must_use]
    pub fn root_dispersion(&self) -> f64 {
        f64::from(self.u32_at(8)) / 65536.0
    }

    pub fn set_root_dispersion(&mut self, seconds: f64) {
        self.set_u32_at(8, (seconds * 65536.0) as u32);
    }

    #[must_use]
    pub fn reference_id(&self) -> u32 {
        self.u32_at(12)
    }

    pub fn set_reference_id(&mut self, id: u32) {
        self.set_u32_at(12, id);
    }

    #[must_use]
    pub fn reference_timestamp(&self) -> NtpTimestamp {
        self.timestamp_at(16)
    }

    pub fn set_reference_timestamp(&mut self, ts: NtpTimestamp) {
        self.set_timestamp_at(16, ts);
    }

    /// Client transmit time echoed back by the server.
    #[must_use]
    pub fn originate_timestamp(&self) -> NtpTimestamp {
        self.timestamp_at(24)
    }

    pub fn set_originate_timestamp(&mut self, ts: NtpTimestamp) {
        self.set_timestamp_at(24, ts);
    }

    /// Server time when the request arrived.
    #[must_use]
    pub fn receive_timestamp(&self) -> NtpTimestamp {
        self.timestamp_at(32)
    }

    pub fn set_receive_timestamp(&mut self, ts: NtpTimestamp) {
        self.set_timestamp_at(32, ts);
    }

    /// Time the packet left its sender.
    #[must_use]
    pub fn transmit_timestamp(&self) -> NtpTimestamp {
        self.timestamp_at(40)
    }

    pub fn set_transmit_timestamp(&mut self, ts: NtpTimestamp) {
        self.set_timestamp_at(40, ts);
    }

    fn set_bits(&mut self, index: usize, mask: u8, value: u8) {
        self.bytes[index] = (self.bytes[index] & !mask) | (value & mask);
    }

    fn u32_at(&self, index: usize) -> u32 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.bytes[index..index + 4]);
        u32::from_be_bytes(arr)
    }

    fn set_u32_at(&mut self, index: usize, value: u32) {
        self.bytes[index..index + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn timestamp_at(&self, index: usize) -> NtpTimestamp {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&self.bytes[index..index + 8]);
        NtpTimestamp::from_bits(u64::from_be_bytes(arr))
    }

    fn set_timestamp_at(&mut self, index: usize, ts: NtpTimestamp) {
        self.bytes[index..index + 8].copy_from_slice(&ts.to_bits().to_be_bytes());
    }
}

impl Default for NtpPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtpPacket")
            .field("leap", &self.leap_indicator())
            .field("version", &self.version())
            .field("mode", &self.mode())
            .field("stratum", &self.stratum())
            .field("originate", &self.originate_timestamp())
            .field("receive", &self.receive_timestamp())
            .field("transmit", &self.transmit_timestamp())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_packet_is_v4_client() {
        let packet = NtpPacket::new();
        assert_eq!(packet.as_bytes()[0], 0x23);
        assert_eq!(packet.version(), 4);
        assert_eq!(packet.mode(), Mode::Client);
        assert_eq!(packet.leap_indicator(), LeapIndicator::NoWarning);
    }

    #[test]
    fn header_bits_do_not_overlap() {
        let mut packet = NtpPacket::new();
        packet.set_leap_indicator(LeapIndicator::AlarmCondition);
        packet.set_mode(Mode::Server);
        assert_eq!(packet.as_bytes()[0], 0b1110_0100);
        assert_eq!(packet.version(), 4);
    }

    #[test]
    fn timestamps_are_big_endian() {
        let mut packet = NtpPacket::new();
        packet.set_transmit_timestamp(NtpTimestamp::from_bits(0x0102_0304_0506_0708));
        assert_eq!(&packet.as_bytes()[40..48], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn unix_epoch_maps_to_era_offset() {
        let ts = NtpTimestamp::from_system_time(UNIX_EPOCH);
        assert_eq!(u64::from(ts.seconds()), UNIX_EPOCH_OFFSET);
        assert_eq!(ts.fraction(), 0);
    }

    #[test]
    fn fraction_keeps_sub_microsecond_precision() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 250_000_000);
        let ts = NtpTimestamp::from_system_time(time);
        assert_eq!(ts.fraction(), 1 << 30);
        let back = unix_nanos(ts.to_system_time());
        assert!((back - unix_nanos(time)).abs() <= 1);
    }

    #[test]
    fn poll_and_precision_are_powers_of_two() {
        let mut packet = NtpPacket::new();
        packet.set_poll_interval(60.0);
        assert_eq!(packet.poll_exponent(), 6);
        assert_eq!(packet.poll_interval(), 64.0);
        packet.set_poll_interval(1.0);
        assert_eq!(packet.poll_exponent(), 4);

        packet.set_precision(1e-6);
        assert_eq!(packet.precision_exponent(), -20);
        assert_eq!(packet.precision(), 2f64.powi(-20));
    }

    #[test]
    fn root_delay_is_signed_fixed_point() {
        let mut packet = NtpPacket::new();
        packet.set_root_delay(-0.5);
        assert_eq!(packet.root_delay(), -0.5);
        packet.set_root_dispersion(1.25);
        assert_eq!(packet.root_dispersion(), 1.25);
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert!(matches!(
            NtpPacket::from_bytes(&[0; 20]),
            Err(WireError::BufferTooSmall { need: 48, have: 20 })
        ));
    }
}
