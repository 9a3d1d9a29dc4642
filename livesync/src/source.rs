//! Registrable timed data sources.
//!
//! A capture device owns a [`TimedSource`] holding its jitter buffer. When the
//! device is enabled the source registers itself in a [`Registry`]; a
//! [`Synchronizer`](crate::sync::Synchronizer) then drives presentation of
//! synchronized sources once per tick, while unsynchronized sources present
//! every sample as soon as it arrives.

pub mod registry;
pub mod timed_source;

pub use registry::Registry;
pub use timed_source::{FramePresented, TimedSource};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::TimedSampleStatus;
use crate::time::{FrameRate, FrameTime, FrameTimeWithRate};

/// Stable identifier of a registrable object.
///
/// Generated once from a random UUID and persisted by the owner so the same
/// device keeps its id across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An id is valid when it is non-empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }

    /// Replaces an invalid id with a freshly generated one.
    pub fn ensure_valid(&mut self) {
        if !self.is_valid() {
            *self = Self::generate();
        }
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything a [`Registry`] can hold.
pub trait Registrable: Send + Sync {
    fn id(&self) -> SourceId;

    /// Human-readable name for logs and user interfaces.
    fn friendly_name(&self) -> String;
}

/// The view of a data source the synchronizer works with.
pub trait TimedDataSource: Registrable {
    fn frame_rate(&self) -> FrameRate;

    fn buffer_size(&self) -> usize;

    /// Sets the buffer size, clamped to the source's limits.
    fn set_buffer_size(&self, size: usize);

    fn min_buffer_size(&self) -> Option<usize> {
        None
    }

    fn max_buffer_size(&self) -> Option<usize> {
        None
    }

    /// Latency compensation applied to every lookup.
    fn offset(&self) -> FrameTime;

    fn set_offset(&self, offset: FrameTime);

    fn is_synchronized(&self) -> bool;

    fn set_synchronized(&self, synchronized: bool);

    /// Oldest and newest buffered times, shifted by the offset.
    fn try_get_buffer_range(&self) -> Option<(FrameTime, FrameTime)>;

    /// Presents the sample at `time`, remapped into this source's rate.
    ///
    /// Calls made while the source is already presenting are ignored and
    /// report the status of the presentation in progress.
    fn present_at(&self, time: FrameTimeWithRate) -> TimedSampleStatus;
}
