use parking_lot::Mutex;

use super::ltc::{LtcDecoder, LtcFrame};
use super::{ReferenceError, TimecodeSource};
use crate::source::{Registrable, SourceId};
use crate::time::{FrameRate, Timecode};
use crate::trace::{debug, trace};

/// Sample rate audio is expected at unless configured otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Timecode reference decoded from an LTC audio feed.
///
/// The audio thread hands samples to [`push_samples`](Self::push_samples);
/// the tick thread polls the last decoded timecode. Both sides only touch
/// the lock-guarded decoder and latest-timecode slot.
pub struct LtcTimecodeSource {
    id: SourceId,
    name: String,
    frame_rate: FrameRate,
    channel: usize,
    decoder: Mutex<LtcDecoder>,
    latest: Mutex<Option<Timecode>>,
}

impl LtcTimecodeSource {
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidSampleRate`] for a zero sample rate.
    pub fn new(
        mut id: SourceId,
        name: impl Into<String>,
        frame_rate: FrameRate,
        sample_rate: u32,
    ) -> Result<Self, ReferenceError> {
        id.ensure_valid();
        Ok(Self {
            id,
            name: name.into(),
            frame_rate,
            channel: 0,
            decoder: Mutex::new(LtcDecoder::new(sample_rate, frame_rate)?),
            latest: Mutex::new(None),
        })
    }

    /// Selects which channel of interleaved input carries the timecode.
    #[must_use]
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Decodes a block of interleaved audio with `channels` channels.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidChannel`] when the selected channel
    /// does not exist in the block.
    pub fn push_samples(&self, samples: &[f32], channels: usize) -> Result<(), ReferenceError> {
        if channels == 0 || self.channel >= channels {
            return Err(ReferenceError::InvalidChannel {
                channel: self.channel,
                channels,
            });
        }

        let mut decoded = None;
        {
            let mut decoder = self.decoder.lock();
            for &sample in samples.iter().skip(self.channel).step_by(channels) {
                if let Some(frame) = decoder.decode(sample) {
                    decoded = Some(frame);
                }
            }
        }

        if let Some(frame) = decoded {
            self.on_frame_decoded(frame);
        }
        Ok(())
    }

    /// Last decoded timecode, without the poll semantics.
    #[must_use]
    pub fn now(&self) -> Option<Timecode> {
        *self.latest.lock()
    }

    /// Input level in dBFS, for metering.
    #[must_use]
    pub fn volume_db(&self) -> f32 {
        self.decoder.lock().volume_db()
    }

    /// Drops decoder state and the held timecode.
    pub fn reset(&self) {
        self.decoder.lock().reset();
        *self.latest.lock() = None;
    }

    fn on_frame_decoded(&self, frame: LtcFrame) {
        match Timecode::from_hmsf(
            self.frame_rate,
            u32::from(frame.hours),
            u32::from(frame.minutes),
            u32::from(frame.seconds),
            u32::from(frame.frames),
        ) {
            Ok(timecode) => {
                trace!(%timecode, reversed = frame.reversed, "ltc frame");
                *self.latest.lock() = Some(timecode);
            }
            Err(_err) => {
                debug!(error = %_err, "discarding ltc frame outside the configured rate");
            }
        }
    }
}

impl Registrable for LtcTimecodeSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn friendly_name(&self) -> String {
        format!("LTC ({})", self.name)
    }
}

impl TimecodeSource for LtcTimecodeSource {
    fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    fn try_poll_timecode(&self) -> Option<(FrameRate, Timecode)> {
        self.now().map(|timecode| (self.frame_rate, timecode))
    }
}
