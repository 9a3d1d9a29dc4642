//! Time-keyed jitter buffer.

use std::fmt;
use std::sync::Arc;

use super::{CircularBuffer, Interpolator};
use crate::time::{FrameRate, FrameTime};

/// One buffered sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSample<T> {
    pub time: FrameTime,
    pub value: T,
}

/// Presentation status of a lookup, without the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimedSampleStatus {
    /// A sample at (or interpolated for) the requested time exists.
    Ok,
    /// The requested time is newer than the newest sample.
    Ahead,
    /// The requested time is older than the oldest sample.
    Behind,
    /// Nothing is buffered, or the source is disabled.
    #[default]
    DataMissing,
}

impl fmt::Display for TimedSampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Ahead => "ahead",
            Self::Behind => "behind",
            Self::DataMissing => "data missing",
        })
    }
}

/// Result of [`TimedDataBuffer::try_get_sample`].
///
/// `Ahead` carries the newest sample and `Behind` the oldest so a caller can
/// hold the closest frame it has.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleLookup<T> {
    Ok(T),
    Ahead(T),
    Behind(T),
    DataMissing,
}

impl<T> SampleLookup<T> {
    #[must_use]
    pub const fn status(&self) -> TimedSampleStatus {
        match self {
            Self::Ok(_) => TimedSampleStatus::Ok,
            Self::Ahead(_) => TimedSampleStatus::Ahead,
            Self::Behind(_) => TimedSampleStatus::Behind,
            Self::DataMissing => TimedSampleStatus::DataMissing,
        }
    }

    /// The exact or interpolated sample, only for [`SampleLookup::Ok`].
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    /// The carried sample, whatever the status.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Ok(value) | Self::Ahead(value) | Self::Behind(value) => Some(value),
            Self::DataMissing => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SampleLookup<U> {
        match self {
            Self::Ok(value) => SampleLookup::Ok(f(value)),
            Self::Ahead(value) => SampleLookup::Ahead(f(value)),
            Self::Behind(value) => SampleLookup::Behind(f(value)),
            Self::DataMissing => SampleLookup::DataMissing,
        }
    }
}

/// Bounded store of samples ordered by [`FrameTime`].
///
/// Samples are expected roughly in time order: insertion scans from the back,
/// so in-order adds are O(1) and late samples cost one shift per newer entry.
/// When full, the oldest sample is evicted.
pub struct TimedDataBuffer<T> {
    samples: CircularBuffer<TimedSample<T>>,
    frame_rate: FrameRate,
    interpolator: Option<Arc<dyn Interpolator<T>>>,
}

impl<T: Clone> TimedDataBuffer<T> {
    #[must_use]
    pub fn new(frame_rate: FrameRate, capacity: usize) -> Self {
        Self {
            samples: CircularBuffer::new(capacity),
            frame_rate,
            interpolator: None,
        }
    }

    #[must_use]
    pub fn with_interpolator(mut self, interpolator: Arc<dyn Interpolator<T>>) -> Self {
        self.interpolator = Some(interpolator);
        self
    }

    pub fn set_interpolator(&mut self, interpolator: Option<Arc<dyn Interpolator<T>>>) {
        self.interpolator = interpolator;
    }

    #[must_use]
    pub const fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Changes the rate, remapping every stored time into it.
    pub fn set_frame_rate(&mut self, frame_rate: FrameRate) {
        let old = self.frame_rate;
        if old == frame_rate {
            return;
        }
        for i in 0..self.samples.len() {
            if let Some(sample) = self.samples.get_mut(i) {
                sample.time = sample.time.remap(old, frame_rate);
            }
        }
        self.frame_rate = frame_rate;
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Resizes, keeping the most recent `min(len, capacity)` samples.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.samples.set_capacity(capacity);
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Adds a sample at `time`, replacing any sample with an equal time.
    ///
    /// A sample older than everything in a full buffer is discarded, since it
    /// would be evicted immediately.
    pub fn add(&mut self, value: T, time: FrameTime) {
        let mut index = self.samples.len();
        while index > 0 {
            let Some(prev) = self.samples.get(index - 1) else {
                break;
            };
            if prev.time == time {
                if let Some(existing) = self.samples.get_mut(index - 1) {
                    existing.value = value;
                }
                return;
            }
            if prev.time < time {
                break;
            }
            index -= 1;
        }

        if index == 0 && self.samples.is_full() {
            return;
        }

        self.samples.insert(index, TimedSample { time, value });
    }

    /// Adds a sample timed at another rate.
    pub fn add_with_rate(&mut self, value: T, time: FrameTime, rate: FrameRate) {
        self.add(value, time.remap(rate, self.frame_rate));
    }

    /// Looks up the sample to present at `time`.
    ///
    /// Between two samples the interpolator blends them; without one the
    /// nearer sample wins, ties going to the earlier sample.
    pub fn try_get_sample(&self, time: FrameTime) -> SampleLookup<T> {
        let (Some(oldest), Some(newest)) = (self.samples.front(), self.samples.back()) else {
            return SampleLookup::DataMissing;
        };
        if time > newest.time {
            return SampleLookup::Ahead(newest.value.clone());
        }
        if time < oldest.time {
            return SampleLookup::Behind(oldest.value.clone());
        }

        // First index whose time is >= `time`; it exists since time <= newest.
        let upper = self.lower_bound(time);
        let Some(after) = self.samples.get(upper) else {
            return SampleLookup::Ahead(newest.value.clone());
        };
        if after.time == time || upper == 0 {
            return SampleLookup::Ok(after.value.clone());
        }
        let Some(before) = self.samples.get(upper - 1) else {
            return SampleLookup::Ok(after.value.clone());
        };

        let span = (after.time - before.time).as_f64();
        let t = if span > 0.0 {
            ((time - before.time).as_f64() / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let value = match &self.interpolator {
            Some(interpolator) => interpolator.interpolate(&before.value, &after.value, t),
            None if t <= 0.5 => before.value.clone(),
            None => after.value.clone(),
        };
        SampleLookup::Ok(value)
    }

    /// Times of the oldest and newest samples.
    #[must_use]
    pub fn try_get_buffer_range(&self) -> Option<(FrameTime, FrameTime)> {
        Some((self.samples.front()?.time, self.samples.back()?.time))
    }

    /// Samples whose time lies in `[from, to]`, oldest first.
    ///
    /// Bounds given in reverse are swapped. The iterator is `Clone`, so it
    /// can be restarted from a saved copy.
    pub fn get_samples_in_range(&self, from: FrameTime, to: FrameTime) -> SamplesInRange<'_, T> {
        let (from, to) = if from > to { (to, from) } else { (from, to) };

        let empty = SamplesInRange {
            buffer: self,
            index: 0,
            to,
            done: true,
        };
        let Some((oldest, newest)) = self.try_get_buffer_range() else {
            return empty;
        };
        if to < oldest || from > newest {
            return empty;
        }

        SamplesInRange {
            buffer: self,
            index: self.lower_bound(from),
            to,
            done: false,
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TimedSample<T>> {
        self.samples.iter()
    }

    fn lower_bound(&self, time: FrameTime) -> usize {
        let (mut lo, mut hi) = (0, self.samples.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.samples.get(mid) {
                Some(sample) if sample.time < time => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }
}

impl<T> fmt::Debug for TimedDataBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedDataBuffer")
            .field("frame_rate", &self.frame_rate)
            .field("len", &self.samples.len())
            .field("capacity", &self.samples.capacity())
            .field("interpolated", &self.interpolator.is_some())
            .finish()
    }
}

/// Iterator returned by [`TimedDataBuffer::get_samples_in_range`].
pub struct SamplesInRange<'a, T> {
    buffer: &'a TimedDataBuffer<T>,
    index: usize,
    to: FrameTime,
    done: bool,
}

impl<T> Clone for SamplesInRange<'_, T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer,
            index: self.index,
            to: self.to,
            done: self.done,
        }
    }
}

impl<'a, T> Iterator for SamplesInRange<'a, T> {
    type Item = &'a TimedSample<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.buffer.samples.get(self.index) {
            Some(sample) if sample.time <= self.to => {
                self.index += 1;
                Some(sample)
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LerpInterpolator;
    use crate::time::{StandardFrameRate, Subframe};

    fn rate() -> FrameRate {
        StandardFrameRate::Fps30.into()
    }

    fn frame(n: i32) -> FrameTime {
        FrameTime::from_frame(n)
    }

    fn filled(capacity: usize, frames: std::ops::Range<i32>) -> TimedDataBuffer<f64> {
        let mut buffer = TimedDataBuffer::new(rate(), capacity);
        for n in frames {
            buffer.add(f64::from(n), frame(n));
        }
        buffer
    }

    #[test]
    fn empty_buffer_reports_data_missing() {
        let buffer: TimedDataBuffer<f64> = TimedDataBuffer::new(rate(), 4);
        assert_eq!(buffer.try_get_sample(frame(0)), SampleLookup::DataMissing);
        assert_eq!(buffer.try_get_buffer_range(), None);
    }

    #[test]
    fn retains_most_recent_capacity_samples() {
        let buffer = filled(5, 0..12);
        assert_eq!(buffer.len(), 5);
        let times: Vec<i32> = buffer.iter().map(|s| s.time.frame()).collect();
        assert_eq!(times, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn ahead_behind_and_ok() {
        let buffer = filled(5, 0..12);
        assert_eq!(buffer.try_get_sample(frame(6)), SampleLookup::Behind(7.0));
        assert_eq!(buffer.try_get_sample(frame(12)), SampleLookup::Ahead(11.0));
        assert_eq!(buffer.try_get_sample(frame(9)), SampleLookup::Ok(9.0));
        assert_eq!(
            buffer.try_get_sample(frame(12)).status(),
            TimedSampleStatus::Ahead
        );
    }

    #[test]
    fn between_samples_picks_nearest_without_interpolator() {
        let mut buffer = TimedDataBuffer::new(rate(), 4);
        buffer.add(1.0, frame(0));
        buffer.add(5.0, frame(4));

        let early = FrameTime::new(1, Subframe::ZERO);
        let late = FrameTime::new(3, Subframe::ZERO);
        assert_eq!(buffer.try_get_sample(early), SampleLookup::Ok(1.0));
        assert_eq!(buffer.try_get_sample(late), SampleLookup::Ok(5.0));
        assert_eq!(buffer.try_get_sample(frame(2)), SampleLookup::Ok(1.0));
    }

    #[test]
    fn between_samples_interpolates() {
        let mut buffer: TimedDataBuffer<f64> =
            TimedDataBuffer::new(rate(), 4).with_interpolator(Arc::new(LerpInterpolator));
        buffer.add(1.0, frame(0));
        buffer.add(5.0, frame(4));
        assert_eq!(buffer.try_get_sample(frame(1)), SampleLookup::Ok(2.0));
    }

    #[test]
    fn add_out_of_order_keeps_time_order() {
        let mut buffer = TimedDataBuffer::new(rate(), 8);
        for n in [3, 1, 2, 5, 4] {
            buffer.add(f64::from(n), frame(n));
        }
        let times: Vec<i32> = buffer.iter().map(|s| s.time.frame()).collect();
        assert_eq!(times, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn add_replaces_equal_time() {
        let mut buffer = TimedDataBuffer::new(rate(), 4);
        buffer.add(1.0, frame(2));
        buffer.add(9.0, frame(2));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.try_get_sample(frame(2)), SampleLookup::Ok(9.0));
    }

    #[test]
    fn late_sample_into_full_buffer_is_dropped() {
        let mut buffer = filled(3, 10..13);
        buffer.add(0.0, frame(1));
        assert_eq!(buffer.try_get_buffer_range(), Some((frame(10), frame(12))));
    }

    #[test]
    fn samples_in_range_is_inclusive_and_restartable() {
        let buffer = filled(10, 0..10);
        let range = buffer.get_samples_in_range(frame(7), frame(3));
        let first: Vec<i32> = range.clone().map(|s| s.time.frame()).collect();
        let again: Vec<i32> = range.map(|s| s.time.frame()).collect();
        assert_eq!(first, vec![3, 4, 5, 6, 7]);
        assert_eq!(first, again);

        assert_eq!(buffer.get_samples_in_range(frame(20), frame(30)).count(), 0);
        assert_eq!(buffer.get_samples_in_range(frame(-5), frame(0)).count(), 1);
    }

    #[test]
    fn set_capacity_keeps_newest() {
        let mut buffer = filled(10, 0..10);
        buffer.set_capacity(3);
        assert_eq!(buffer.try_get_buffer_range(), Some((frame(7), frame(9))));
    }

    #[test]
    fn set_frame_rate_remaps_times() {
        let mut buffer = filled(4, 0..4);
        buffer.set_frame_rate(StandardFrameRate::Fps60.into());
        assert_eq!(buffer.try_get_buffer_range(), Some((frame(0), frame(6))));
        assert_eq!(buffer.try_get_sample(frame(4)), SampleLookup::Ok(2.0));
    }

    #[test]
    fn add_with_rate_remaps_into_buffer_rate() {
        let mut buffer = TimedDataBuffer::new(rate(), 4);
        buffer.add_with_rate(1.0, frame(10), StandardFrameRate::Fps60.into());
        assert_eq!(buffer.try_get_buffer_range(), Some((frame(5), frame(5))));
    }
}
