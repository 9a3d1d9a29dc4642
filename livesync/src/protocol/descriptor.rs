use std::fmt;

use super::WireError;
use super::wire::{WireReader, WireWriter};
use crate::net::ChannelType;

/// Which way a message flows, seen from the table's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Send = 0,
    Receive = 1,
}

impl Direction {
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Send => Self::Receive,
            Self::Receive => Self::Send,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Send),
            1 => Ok(Self::Receive),
            other => Err(WireError::InvalidDiscriminant {
                name: "Direction",
                value: i64::from(other),
            }),
        }
    }
}

/// Shape of a message's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    Event = 0,
    Binary = 1,
    Json = 2,
    Text = 3,
}

impl PayloadKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Binary => "binary",
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl TryFrom<u8> for PayloadKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Event),
            1 => Ok(Self::Binary),
            2 => Ok(Self::Json),
            3 => Ok(Self::Text),
            other => Err(WireError::InvalidDiscriminant {
                name: "PayloadKind",
                value: i64::from(other),
            }),
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flags configuring how data senders behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataOptions(u32);

impl DataOptions {
    pub const NONE: Self = Self(0);

    /// Skip a send whose encoded payload equals the previous one.
    pub const ONLY_SEND_CHANGED: Self = Self(1);

    pub const DEFAULT: Self = Self::ONLY_SEND_CHANGED;

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Unknown bits from a newer remote are kept but ignored.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for DataOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::ops::BitOr for DataOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One entry of a message table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: String,
    pub ordinal: u16,
    pub channel: ChannelType,
    pub direction: Direction,
    pub kind: PayloadKind,
    pub options: DataOptions,
    /// Payload type name, empty for events.
    pub type_name: String,
    /// Payload layout hash, zero for events.
    pub layout_hash: u64,
}

impl MessageDescriptor {
    /// The same message as seen from the remote.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            direction: self.direction.inverse(),
            ..self.clone()
        }
    }

    /// # Errors
    ///
    /// [`WireError::LengthOverflow`] for ids or type names that do not fit.
    pub fn write_to(&self, w: &mut WireWriter<'_>) -> Result<(), WireError> {
        w.put_u8(self.kind as u8);
        w.put_u8(self.direction as u8);
        w.put_str(&self.id)?;
        w.put_u8(self.channel as u8);
        w.put_u16(self.ordinal);
        w.put_u32(self.options.bits());
        w.put_str(&self.type_name)?;
        w.put_u64(self.layout_hash);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a [`WireError`] for truncated input, bad UTF-8 or an unknown
    /// discriminant.
    pub fn read_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let kind = PayloadKind::try_from(r.take_u8()?)?;
        let direction = Direction::try_from(r.take_u8()?)?;
        let id = r.take_str()?.to_owned();
        let channel = ChannelType::try_from(r.take_u8()?)?;
        let ordinal = r.take_u16()?;
        let options = DataOptions::from_bits(r.take_u32()?);
        let type_name = r.take_str()?.to_owned();
        let layout_hash = r.take_u64()?;
        Ok(Self {
            id,
            ordinal,
            channel,
            direction,
            kind,
            options,
            type_name,
            layout_hash,
        })
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{} ({} {:?})", self.id, self.ordinal, self.kind, self.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor {
            id: "CompanionApp_ToClient_PlayerState".into(),
            ordinal: 3,
            channel: ChannelType::ReliableOrdered,
            direction: Direction::Send,
            kind: PayloadKind::Binary,
            options: DataOptions::DEFAULT,
            type_name: "PlayerState".into(),
            layout_hash: 0xfeed,
        }
    }

    #[test]
    fn inverse_flips_direction_only() {
        let inverse = descriptor().inverse();
        assert_eq!(inverse.direction, Direction::Receive);
        assert_eq!(inverse.ordinal, 3);
        assert_eq!(inverse.inverse(), descriptor());
    }

    #[test]
    fn unknown_kind_byte_is_rejected() {
        let mut buf = Vec::new();
        descriptor().write_to(&mut WireWriter::new(&mut buf)).unwrap();
        buf[0] = 9;
        assert!(matches!(
            MessageDescriptor::read_from(&mut WireReader::new(&buf)),
            Err(WireError::InvalidDiscriminant { name: "PayloadKind", value: 9 })
        ));
    }

    #[test]
    fn options_keep_unknown_bits() {
        let options = DataOptions::from_bits(0b101);
        assert!(options.contains(DataOptions::ONLY_SEND_CHANGED));
        assert!(!DataOptions::NONE.contains(DataOptions::ONLY_SEND_CHANGED));
        assert_eq!((DataOptions::NONE | DataOptions::ONLY_SEND_CHANGED).bits(), 1);
    }
}
