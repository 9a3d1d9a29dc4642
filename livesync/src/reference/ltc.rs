//! Biphase-mark LTC decoding.
//!
//! SMPTE linear timecode carries one 80 bit codeword per frame. Every bit
//! cell starts with a level transition and a `1` bit has a second transition
//! half way through the cell. The decoder tracks the signal level against an
//! adaptive envelope, measures the samples between transitions against an
//! adaptive bit period estimate, and shifts decoded bits into an 80 bit
//! window until the sync word lines up at either end.

use super::ReferenceError;
use crate::time::FrameRate;
use crate::trace::trace;

/// Sync word as it appears in bits 64..80 when reading forward.
pub const SYNC_WORD: u16 = 0xBFFC;
/// Sync word as it appears in bits 0..16 when the tape runs backwards.
pub const SYNC_WORD_REVERSED: u16 = 0x3FFD;

pub const BITS_PER_FRAME: u32 = 80;

const VOLUME_FALLOFF: f32 = 0.95;
const THRESHOLD: f32 = 0.5;
const PERIOD_ADAPTIVITY: f32 = 0.25;
/// Envelope level below which the input is treated as silence.
const NOISE_FLOOR: f32 = 0.01;

/// One decoded codeword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LtcFrame {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub drop_frame: bool,
    /// True when the codeword was read with the tape running backwards.
    pub reversed: bool,
}

impl LtcFrame {
    /// Unpacks the BCD fields of an 80 bit codeword stored least significant
    /// bit first across `lo` (bits 0..64) and `hi` (bits 64..80).
    #[must_use]
    pub fn from_codeword(lo: u64, reversed: bool) -> Self {
        let bcd = |offset: u32, units_bits: u32, tens_bits: u32| -> u8 {
            let units = (lo >> offset) & ((1 << units_bits) - 1);
            let tens = (lo >> (offset + 8)) & ((1 << tens_bits) - 1);
            (tens * 10 + units) as u8
        };

        Self {
            frames: bcd(0, 4, 2),
            seconds: bcd(16, 4, 3),
            minutes: bcd(32, 4, 3),
            hours: bcd(48, 4, 2),
            drop_frame: (lo >> 10) & 1 == 1,
            reversed,
        }
    }

    /// Packs this frame into the low 64 bits of a codeword, user bits zero.
    #[must_use]
    pub fn to_codeword(&self) -> u64 {
        let bcd = |value: u8, offset: u32| -> u64 {
            let value = u64::from(value);
            ((value % 10) << offset) | ((value / 10) << (offset + 8))
        };

        bcd(self.frames, 0)
            | (u64::from(self.drop_frame) << 10)
            | bcd(self.seconds, 16)
            | bcd(self.minutes, 32)
            | bcd(self.hours, 48)
    }
}

/// Streaming LTC decoder over mono samples in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct LtcDecoder {
    nominal_period: f32,
    period: f32,
    volume: f32,
    sample_count: f32,
    is_high: bool,
    primed: bool,
    half_bit: bool,
    /// Codeword bits 0..64.
    lo: u64,
    /// Codeword bits 64..80 in the low 16 bits.
    hi: u64,
}

impl LtcDecoder {
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidSampleRate`] for a zero sample rate.
    pub fn new(sample_rate: u32, frame_rate: FrameRate) -> Result<Self, ReferenceError> {
        if sample_rate == 0 {
            return Err(ReferenceError::InvalidSampleRate(sample_rate));
        }
        let period = sample_rate as f32 / (frame_rate.as_f64() as f32 * BITS_PER_FRAME as f32);
        Ok(Self {
            nominal_period: period,
            period,
            volume: 0.0,
            sample_count: 0.0,
            is_high: false,
            primed: false,
            half_bit: false,
            lo: 0,
            hi: 0,
        })
    }

    /// Current bit period estimate in samples.
    #[must_use]
    pub fn bit_period(&self) -> f32 {
        self.period
    }

    /// Envelope of the input signal.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Envelope of the input signal in decibels full scale.
    #[must_use]
    pub fn volume_db(&self) -> f32 {
        if self.volume <= 0.0 {
            f32::NEG_INFINITY
        } else {
            20.0 * self.volume.log10()
        }
    }

    /// Forgets all signal state, as after a change of input.
    pub fn reset(&mut self) {
        self.period = self.nominal_period;
        self.volume = 0.0;
        self.sample_count = 0.0;
        self.is_high = false;
        self.primed = false;
        self.reset_queue();
    }

    /// Feeds every sample in `samples`, calling `on_frame` per decoded frame.
    pub fn decode_samples(&mut self, samples: &[f32], mut on_frame: impl FnMut(LtcFrame)) {
        for &sample in samples {
            if let Some(frame) = self.decode(sample) {
                on_frame(frame);
            }
        }
    }

    /// Feeds one sample, returning a frame when its codeword completes.
    pub fn decode(&mut self, sample: f32) -> Option<LtcFrame> {
        self.sample_count += 1.0;
        self.volume = sample.abs().max(self.volume * VOLUME_FALLOFF);

        if self.volume < NOISE_FLOOR {
            return None;
        }

        let threshold = THRESHOLD * self.volume;
        let crossed = if self.is_high {
            sample < -threshold
        } else {
            sample > threshold
        };
        if !crossed {
            return None;
        }

        let count = self.sample_count;
        self.is_high = sample > 0.0;
        self.sample_count = 0.0;

        // The first edge only tells us where a bit cell begins.
        if !self.primed {
            self.primed = true;
            return None;
        }

        // A long gap means dropout or silence, so the window is stale.
        if count > 3.0 * self.period {
            trace!(samples = count, period = self.period, "ltc gap, resetting bit queue");
            self.reset_queue();
            return None;
        }

        let mut decoded = None;
        let mut cell = count;
        if count > 0.75 * self.period {
            decoded = self.push_bit(false);
        } else if self.half_bit {
            decoded = self.push_bit(true);
            self.half_bit = false;
            cell *= 2.0;
        } else {
            self.half_bit = true;
            cell *= 2.0;
        }

        self.period += (cell - self.period) * PERIOD_ADAPTIVITY;
        decoded
    }

    fn reset_queue(&mut self) {
        self.lo = 0;
        self.hi = 0;
        self.half_bit = false;
    }

    fn push_bit(&mut self, bit: bool) -> Option<LtcFrame> {
        self.lo = (self.lo >> 1) | ((self.hi & 1) << 63);
        self.hi = (self.hi >> 1) | (u64::from(bit) << 15);

        if self.hi as u16 == SYNC_WORD {
            return Some(LtcFrame::from_codeword(self.lo, false));
        }
        if self.lo as u16 == SYNC_WORD_REVERSED {
            let (lo, _) = reverse_codeword(self.lo, self.hi);
            return Some(LtcFrame::from_codeword(lo, true));
        }
        None
    }
}

/// Mirrors an 80 bit window so bit 0 swaps with bit 79.
fn reverse_codeword(lo: u64, hi: u64) -> (u64, u64) {
    // Bits 16..80 reversed become bits 0..64; bits 0..16 become 64..80.
    let wide = (u128::from(hi & 0xFFFF) << 64) | u128::from(lo);
    let mirrored = wide.reverse_bits() >> (128 - BITS_PER_FRAME);
    (mirrored as u64, (mirrored >> 64) as u64)
}

/// Biphase-mark encoder used by the tests to synthesize LTC audio.
#[cfg(test)]
pub(crate) mod synth {
    use super::*;

    /// Appends the audio for one codeword at `samples_per_bit` per cell.
    pub fn encode_frame(
        out: &mut Vec<f32>,
        level: &mut f32,
        frame: &LtcFrame,
        samples_per_bit: usize,
    ) {
        let lo = frame.to_codeword();
        for bit in 0..BITS_PER_FRAME {
            let value = if bit < 64 {
                (lo >> bit) & 1 == 1
            } else {
                (SYNC_WORD >> (bit - 64)) & 1 == 1
            };
            encode_bit(out, level, value, samples_per_bit);
        }
    }

    pub fn encode_bit(out: &mut Vec<f32>, level: &mut f32, bit: bool, samples_per_bit: usize) {
        let half = samples_per_bit / 2;
        *level = -*level;
        for i in 0..samples_per_bit {
            if bit && i == half {
                *level = -*level;
            }
            out.push(*level);
        }
    }

    /// A final edge so the last bit of the stream is classified.
    pub fn trailing_edge(out: &mut Vec<f32>, level: &mut f32, samples: usize) {
        *level = -*level;
        out.extend(std::iter::repeat_n(*level, samples));
    }
}

#[cfg(test)]
mod tests {
    use super::synth::*;
    use super::*;

    fn frame(h: u8, m: u8, s: u8, f: u8) -> LtcFrame {
        LtcFrame {
            hours: h,
            minutes: m,
            seconds: s,
            frames: f,
            ..LtcFrame::default()
        }
    }

    #[test]
    fn codeword_bcd_fields() {
        let tc = LtcFrame {
            hours: 23,
            minutes: 59,
            seconds: 58,
            frames: 29,
            drop_frame: true,
            reversed: false,
        };
        assert_eq!(LtcFrame::from_codeword(tc.to_codeword(), false), tc);
    }

    #[test]
    fn reversing_twice_is_identity() {
        let lo = 0x0123_4567_89AB_CDEF;
        let hi = u64::from(SYNC_WORD);
        let (rlo, rhi) = reverse_codeword(lo, hi);
        assert_eq!(rlo as u16, SYNC_WORD_REVERSED);
        assert_eq!(reverse_codeword(rlo, rhi), (lo, hi));
    }

    #[test]
    fn decodes_consecutive_frames() {
        let rate = FrameRate::new(25, 1).unwrap();
        let mut decoder = LtcDecoder::new(48_000, rate).unwrap();
        let samples_per_bit = 24;
        let mut audio = Vec::new();
        let mut level = -0.7;
        for f in 0..5 {
            encode_frame(&mut audio, &mut level, &frame(10, 20, 30, f), samples_per_bit);
        }
        trailing_edge(&mut audio, &mut level, samples_per_bit);

        let mut decoded = Vec::new();
        decoder.decode_samples(&audio, |f| decoded.push(f));
        let frames: Vec<u8> = decoded.iter().map(|f| f.frames).collect();
        assert_eq!(frames, vec![0, 1, 2, 3, 4]);
        assert!(decoded.iter().all(|f| (f.hours, f.minutes, f.seconds) == (10, 20, 30)));
    }

    #[test]
    fn reverse_playback_is_detected() {
        let rate = FrameRate::new(25, 1).unwrap();
        let mut decoder = LtcDecoder::new(48_000, rate).unwrap();
        let mut audio = Vec::new();
        let mut level = -0.7;
        for f in 0..3 {
            encode_frame(&mut audio, &mut level, &frame(1, 2, 3, f), 24);
        }
        trailing_edge(&mut audio, &mut level, 24);
        audio.reverse();

        let mut decoded = Vec::new();
        decoder.decode_samples(&audio, |f| decoded.push(f));
        assert!(!decoded.is_empty());
        assert!(decoded.iter().all(|f| f.reversed && f.hours == 1 && f.minutes == 2));
    }

    #[test]
    fn silence_emits_nothing() {
        let mut decoder = LtcDecoder::new(44_100, FrameRate::default()).unwrap();
        let mut count = 0;
        decoder.decode_samples(&vec![0.0; 44_100], |_| count += 1);
        assert_eq!(count, 0);
        assert_eq!(decoder.volume_db(), f32::NEG_INFINITY);
    }

    #[test]
    fn gap_resets_partial_codeword() {
        let rate = FrameRate::new(25, 1).unwrap();
        let mut decoder = LtcDecoder::new(48_000, rate).unwrap();
        let mut audio = Vec::new();
        let mut level = -0.7;
        let lo = frame(0, 0, 1, 0).to_codeword();
        // Half a codeword, then a long pause, then a clean frame.
        for bit in 0..40 {
            encode_bit(&mut audio, &mut level, (lo >> bit) & 1 == 1, 24);
        }
        audio.extend(std::iter::repeat_n(level, 24 * 10));
        encode_frame(&mut audio, &mut level, &frame(0, 0, 2, 5), 24);
        encode_frame(&mut audio, &mut level, &frame(0, 0, 2, 6), 24);
        trailing_edge(&mut audio, &mut level, 24);

        let mut decoded = Vec::new();
        decoder.decode_samples(&audio, |f| decoded.push(f));
        assert_eq!(decoded.last().map(|f| f.frames), Some(6));
        assert!(decoded.iter().all(|f| f.seconds == 2));
    }

    #[test]
    fn rejects_zero_sample_rate() {
        assert!(LtcDecoder::new(0, FrameRate::default()).is_err());
    }
}
