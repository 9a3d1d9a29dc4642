//! The default [`TimedDataSource`] implementation.
//!
//! # Presentation
//!
//! - Synchronized sources are presented by the synchronizer through
//!   [`TimedDataSource::present_at`].
//! - Unsynchronized sources present each sample from [`TimedSource::add_sample`].
//! - `frame_presented` fires once per distinct presented time and never for
//!   `DataMissing`.
//! - A handler that re-enters presentation on the same source is ignored.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use minstant::Instant;
use parking_lot::Mutex;

use super::{Registrable, Registry, SourceId, TimedDataSource};
use crate::buffer::{Interpolator, SampleLookup, TimedDataBuffer, TimedSampleStatus};
use crate::event::{Subscribers, Subscription};
use crate::time::{FrameRate, FrameTime, FrameTimeWithRate, StandardFrameRate};
use crate::trace::{debug, trace};

pub const DEFAULT_BUFFER_SIZE: usize = 5;

/// Payload of the `frame_presented` event.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePresented<T> {
    pub value: T,
    pub time: FrameTimeWithRate,
    pub status: TimedSampleStatus,
}

struct State<T> {
    frame_rate: FrameRate,
    buffer_size: usize,
    min_buffer_size: Option<usize>,
    max_buffer_size: Option<usize>,
    offset: FrameTime,
    synchronized: bool,
    interpolator: Option<Arc<dyn Interpolator<T>>>,
    /// `None` while disabled.
    buffer: Option<TimedDataBuffer<T>>,
    last_presented: Option<FrameTimeWithRate>,
    last_status: TimedSampleStatus,
}

struct Shared<T> {
    id: SourceId,
    friendly_name: String,
    created: Instant,
    state: Mutex<State<T>>,
    presenting: AtomicBool,
    frame_presented: Subscribers<FramePresented<T>>,
}

/// A jitter-buffered source of samples of type `T`.
///
/// Cloning yields another handle to the same source.
pub struct TimedSource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TimedSource<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Clears the presenting flag when dropped.
struct PresentingGuard<'a>(&'a AtomicBool);

impl<'a> PresentingGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PresentingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Clone + Send + Sync + 'static> TimedSource<T> {
    /// Creates a disabled source. An invalid `id` is replaced by a new one.
    #[must_use]
    pub fn new(id: SourceId, friendly_name: impl Into<String>) -> Self {
        let mut id = id;
        id.ensure_valid();
        Self {
            shared: Arc::new(Shared {
                id,
                friendly_name: friendly_name.into(),
                created: Instant::now(),
                state: Mutex::new(State {
                    frame_rate: StandardFrameRate::Fps60.into(),
                    buffer_size: DEFAULT_BUFFER_SIZE,
                    min_buffer_size: None,
                    max_buffer_size: None,
                    offset: FrameTime::ZERO,
                    synchronized: false,
                    interpolator: None,
                    buffer: None,
                    last_presented: None,
                    last_status: TimedSampleStatus::DataMissing,
                }),
                presenting: AtomicBool::new(false),
                frame_presented: Subscribers::new(),
            }),
        }
    }

    #[must_use]
    pub fn with_frame_rate(self, frame_rate: FrameRate) -> Self {
        self.set_frame_rate(frame_rate);
        self
    }

    /// Bounds the buffer size, re-clamping the current size.
    #[must_use]
    pub fn with_buffer_limits(self, min: Option<usize>, max: Option<usize>) -> Self {
        {
            let mut state = self.shared.state.lock();
            state.min_buffer_size = min;
            state.max_buffer_size = max;
        }
        let size = self.buffer_size();
        self.set_buffer_size(size);
        self
    }

    #[must_use]
    pub fn with_interpolator(self, interpolator: Arc<dyn Interpolator<T>>) -> Self {
        self.set_interpolator(Some(interpolator));
        self
    }

    pub fn set_interpolator(&self, interpolator: Option<Arc<dyn Interpolator<T>>>) {
        let mut state = self.shared.state.lock();
        if let Some(buffer) = state.buffer.as_mut() {
            buffer.set_interpolator(interpolator.clone());
        }
        state.interpolator = interpolator;
    }

    /// Changes the rate, remapping buffered samples.
    pub fn set_frame_rate(&self, frame_rate: FrameRate) {
        let mut state = self.shared.state.lock();
        if state.frame_rate == frame_rate {
            return;
        }
        state.frame_rate = frame_rate;
        if let Some(buffer) = state.buffer.as_mut() {
            buffer.set_frame_rate(frame_rate);
        }
    }

    /// True while the source has a buffer and accepts samples.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().buffer.is_some()
    }

    /// Allocates the buffer and registers in `registry`.
    ///
    /// Returns false if already enabled or if the id is taken.
    pub fn enable(&self, registry: &Registry<dyn TimedDataSource>) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.buffer.is_some() {
                return false;
            }
            let mut buffer = TimedDataBuffer::new(state.frame_rate, state.buffer_size);
            buffer.set_interpolator(state.interpolator.clone());
            state.buffer = Some(buffer);
        }

        let entry: Arc<dyn TimedDataSource> = Arc::new(self.clone());
        if !registry.register(entry) {
            self.shared.state.lock().buffer = None;
            return false;
        }
        debug!(id = %self.shared.id, "source enabled");
        true
    }

    /// Unregisters from `registry` and discards all buffered samples.
    pub fn disable(&self, registry: &Registry<dyn TimedDataSource>) {
        registry.unregister(&self.shared.id);
        let mut state = self.shared.state.lock();
        state.buffer = None;
        state.last_presented = None;
        state.last_status = TimedSampleStatus::DataMissing;
        debug!(id = %self.shared.id, "source disabled");
    }

    /// Buffers `value` at `time` (in this source's rate).
    ///
    /// Unsynchronized sources present the sample immediately. Samples added
    /// while disabled are dropped.
    pub fn add_sample(&self, value: T, time: FrameTime) {
        let presented = {
            let mut state = self.shared.state.lock();
            let synchronized = state.synchronized;
            let rate = state.frame_rate;
            let Some(buffer) = state.buffer.as_mut() else {
                trace!(id = %self.shared.id, "sample dropped while disabled");
                return;
            };
            let immediate = (!synchronized).then(|| value.clone());
            buffer.add(value, time);
            immediate.map(|value| (value, FrameTimeWithRate::new(rate, time)))
        };

        if let Some((value, time)) = presented {
            let Some(_guard) = PresentingGuard::try_acquire(&self.shared.presenting) else {
                return;
            };
            self.notify(value, time, TimedSampleStatus::Ok);
        }
    }

    /// Buffers `value` at a time expressed in another rate.
    pub fn add_sample_with_rate(&self, value: T, time: FrameTimeWithRate) {
        let rate = self.frame_rate();
        self.add_sample(value, time.remap(rate).time);
    }

    /// Buffers `value` for a device that provides no timestamps.
    ///
    /// Uses `present_time` when it is at this source's rate, otherwise a
    /// time generated from the source's monotonic clock. Returns the time
    /// used, or `None` while disabled.
    pub fn add_sample_with_generated_time(
        &self,
        value: T,
        present_time: Option<FrameTimeWithRate>,
    ) -> Option<FrameTimeWithRate> {
        if !self.is_enabled() {
            return None;
        }
        let rate = self.frame_rate();
        let time = match present_time {
            Some(time) if time.rate == rate => time,
            _ => FrameTimeWithRate::from_seconds(rate, self.shared.created.elapsed().as_secs_f64()),
        };
        self.add_sample(value, time.time);
        Some(time)
    }

    /// Looks up the sample for `time`, compensating for the offset.
    pub fn try_get_sample(&self, time: FrameTime) -> SampleLookup<T> {
        let state = self.shared.state.lock();
        match state.buffer.as_ref() {
            Some(buffer) => buffer.try_get_sample(time - state.offset),
            None => SampleLookup::DataMissing,
        }
    }

    /// Samples in `[from, to]` with their times shifted by the offset.
    #[must_use]
    pub fn get_samples_in_range(&self, from: FrameTime, to: FrameTime) -> Vec<(FrameTime, T)> {
        let state = self.shared.state.lock();
        let Some(buffer) = state.buffer.as_ref() else {
            return Vec::new();
        };
        let offset = state.offset;
        buffer
            .get_samples_in_range(from - offset, to - offset)
            .map(|sample| (sample.time + offset, sample.value.clone()))
            .collect()
    }

    pub fn clear_buffer(&self) {
        if let Some(buffer) = self.shared.state.lock().buffer.as_mut() {
            buffer.clear();
        }
    }

    /// Status of the last presentation.
    #[must_use]
    pub fn presentation_status(&self) -> TimedSampleStatus {
        self.shared.state.lock().last_status
    }

    /// Calls `handler` for every presented frame until the guard is dropped.
    pub fn on_frame_presented(
        &self,
        handler: impl Fn(&FramePresented<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.frame_presented.subscribe(handler)
    }

    fn notify(&self, value: T, time: FrameTimeWithRate, status: TimedSampleStatus) {
        {
            let mut state = self.shared.state.lock();
            if state.last_presented == Some(time) {
                return;
            }
            state.last_presented = Some(time);
        }
        self.shared
            .frame_presented
            .emit(&FramePresented { value, time, status });
    }
}

impl<T: Clone + Send + Sync + 'static> Registrable for TimedSource<T> {
    fn id(&self) -> SourceId {
        self.shared.id.clone()
    }

    fn friendly_name(&self) -> String {
        self.shared.friendly_name.clone()
    }
}

impl<T: Clone + Send + Sync + 'static> TimedDataSource for TimedSource<T> {
    fn frame_rate(&self) -> FrameRate {
        self.shared.state.lock().frame_rate
    }

    fn buffer_size(&self) -> usize {
        self.shared.state.lock().buffer_size
    }

    fn set_buffer_size(&self, size: usize) {
        let mut state = self.shared.state.lock();
        let mut size = size.max(1);
        if let Some(min) = state.min_buffer_size {
            size = size.max(min);
        }
        if let Some(max) = state.max_buffer_size {
            size = size.min(max.max(1));
        }
        state.buffer_size = size;
        if let Some(buffer) = state.buffer.as_mut() {
            buffer.set_capacity(size);
        }
    }

    fn min_buffer_size(&self) -> Option<usize> {
        self.shared.state.lock().min_buffer_size
    }

    fn max_buffer_size(&self) -> Option<usize> {
        self.shared.state.lock().max_buffer_size
    }

    fn offset(&self) -> FrameTime {
        self.shared.state.lock().offset
    }

    fn set_offset(&self, offset: FrameTime) {
        self.shared.state.lock().offset = offset;
    }

    fn is_synchronized(&self) -> bool {
        self.shared.state.lock().synchronized
    }

    fn set_synchronized(&self, synchronized: bool) {
        let mut state = self.shared.state.lock();
        if state.synchronized != synchronized {
            state.synchronized = synchronized;
            state.last_status = TimedSampleStatus::DataMissing;
        }
    }

    fn try_get_buffer_range(&self) -> Option<(FrameTime, FrameTime)> {
        let state = self.shared.state.lock();
        let (oldest, newest) = state.buffer.as_ref()?.try_get_buffer_range()?;
        Some((oldest + state.offset, newest + state.offset))
    }

    fn present_at(&self, time: FrameTimeWithRate) -> TimedSampleStatus {
        let Some(_guard) = PresentingGuard::try_acquire(&self.shared.presenting) else {
            trace!(id = %self.shared.id, "re-entrant presentation ignored");
            return self.presentation_status();
        };

        let local = time.remap(self.frame_rate());
        let lookup = self.try_get_sample(local.time);
        let status = lookup.status();
        self.shared.state.lock().last_status = status;

        if let Some(value) = lookup.into_value() {
            self.notify(value, local, status);
        }
        status
    }
}

impl<T> fmt::Debug for TimedSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedSource")
            .field("id", &self.shared.id)
            .field("friendly_name", &self.shared.friendly_name)
            .finish_non_exhaustive()
    }
}
