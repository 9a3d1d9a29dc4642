//! Recorded take metadata exchanged as JSON.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::FixedLayout;
use crate::time::FrameRate;

/// Identity of a recorded take.
///
/// Travels as 16 raw bytes in binary messages and as a hyphenated UUID
/// string in JSON. The nil id means "no take".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(FixedLayout, Serialize, Deserialize)]
#[serde(from = "Uuid", into = "Uuid")]
#[repr(transparent)]
pub struct TakeId([u8; 16]);

impl TakeId {
    pub const NIL: Self = Self([0; 16]);

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        let mut i = 0;
        while i < 16 {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    /// `None` for the nil id.
    #[must_use]
    pub const fn non_nil(self) -> Option<Self> {
        if self.is_nil() { None } else { Some(self) }
    }
}

impl From<Uuid> for TakeId {
    fn from(id: Uuid) -> Self {
        Self(id.into_bytes())
    }
}

impl From<TakeId> for Uuid {
    fn from(id: TakeId) -> Self {
        Uuid::from_bytes(id.0)
    }
}

impl fmt::Display for TakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Uuid::from_bytes(self.0).fmt(f)
    }
}

/// Metadata of one recorded take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeDescriptor {
    pub id: TakeId,
    pub name: String,
    pub scene_number: i32,
    pub shot_name: String,
    pub take_number: i32,
    #[serde(default)]
    pub description: String,
    /// Zero for unrated.
    #[serde(default)]
    pub rating: i32,
    pub frame_rate: FrameRate,
    /// Milliseconds since the Unix epoch.
    pub creation_time: i64,
}

impl TakeDescriptor {
    /// A fresh take created now.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        shot_name: impl Into<String>,
        take_number: i32,
        frame_rate: FrameRate,
    ) -> Self {
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX));
        Self {
            id: TakeId::generate(),
            name: name.into(),
            scene_number: 0,
            shot_name: shot_name.into(),
            take_number,
            description: String::new(),
            rating: 0,
            frame_rate,
            creation_time,
        }
    }
}
