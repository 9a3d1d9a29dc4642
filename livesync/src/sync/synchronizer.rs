use std::sync::Arc;

use crate::buffer::TimedSampleStatus;
use crate::reference::{ReferenceClock, TimecodeSource};
use crate::source::{SourceId, TimedDataSource};
use crate::time::{FrameTime, FrameTimeWithRate};
use crate::trace::{debug, trace};

use super::genlock::{Genlock, SyncProvider};

struct Entry {
    source: Arc<dyn TimedDataSource>,
    status: TimedSampleStatus,
}

/// Drives presentation of synchronized sources once per tick.
///
/// Each tick the reference clock yields the present time, the global offset
/// is applied, and every synchronized source is asked to present the sample
/// for that time in its own rate. Sources not flagged as synchronized are
/// left to present themselves as samples arrive.
#[derive(Default)]
pub struct Synchronizer {
    entries: Vec<Entry>,
    clock: ReferenceClock,
    global_time_offset: FrameTime,
    last_presented: Option<FrameTimeWithRate>,
    paused: bool,
}

impl Synchronizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes control of `source`. Returns false if it is already added.
    pub fn add_source(&mut self, source: Arc<dyn TimedDataSource>) -> bool {
        let id = source.id();
        if self.contains_source(&id) {
            return false;
        }
        source.set_synchronized(!self.paused);
        debug!(id = %id, "source added to synchronizer");
        self.entries.push(Entry {
            source,
            status: TimedSampleStatus::DataMissing,
        });
        true
    }

    /// Releases the source, which goes back to presenting on arrival.
    pub fn remove_source(&mut self, id: &SourceId) -> Option<Arc<dyn TimedDataSource>> {
        let index = self.entries.iter().position(|e| &e.source.id() == id)?;
        let entry = self.entries.remove(index);
        entry.source.set_synchronized(false);
        debug!(id = %id, "source removed from synchronizer");
        Some(entry.source)
    }

    #[must_use]
    pub fn contains_source(&self, id: &SourceId) -> bool {
        self.entries.iter().any(|e| &e.source.id() == id)
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn source(&self, index: usize) -> Option<&Arc<dyn TimedDataSource>> {
        self.entries.get(index).map(|e| &e.source)
    }

    /// Status of the last presentation of the source at `index`.
    #[must_use]
    pub fn source_status(&self, index: usize) -> Option<TimedSampleStatus> {
        self.entries.get(index).map(|e| e.status)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn TimedDataSource>> {
        self.entries.iter().map(|e| &e.source)
    }

    #[must_use]
    pub fn global_time_offset(&self) -> FrameTime {
        self.global_time_offset
    }

    /// Shifts the present time, in frames of the reference rate.
    pub fn set_global_time_offset(&mut self, offset: FrameTime) {
        self.global_time_offset = offset;
    }

    #[must_use]
    pub fn reference(&self) -> Option<&Arc<dyn TimecodeSource>> {
        self.clock.source()
    }

    /// Selects the timecode provider. The present time is unknown until it
    /// is next polled.
    pub fn set_reference(&mut self, source: Option<Arc<dyn TimecodeSource>>) {
        self.clock.set_source(source);
        self.last_presented = None;
    }

    /// The present time, offset applied.
    #[must_use]
    pub fn current_time(&self) -> Option<FrameTimeWithRate> {
        self.clock.current().map(|now| self.apply_offset(now))
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stops driving sources; they present on arrival until resumed.
    pub fn pause(&mut self) {
        self.paused = true;
        for entry in &self.entries {
            entry.source.set_synchronized(false);
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.last_presented = None;
        for entry in &self.entries {
            entry.source.set_synchronized(true);
        }
    }

    /// Advances one tick without a genlock.
    pub fn update(&mut self) -> Option<FrameTimeWithRate> {
        self.tick(None)
    }

    /// Advances one tick, filling gaps between polls with the genlock's
    /// pulse delta.
    pub fn update_with_genlock<P: SyncProvider>(
        &mut self,
        genlock: &Genlock<P>,
    ) -> Option<FrameTimeWithRate> {
        self.tick(genlock.pulse_delta())
    }

    fn tick(&mut self, pulse_delta: Option<FrameTimeWithRate>) -> Option<FrameTimeWithRate> {
        if self.paused {
            return None;
        }

        let polled = self.clock.update(pulse_delta)?;
        let now = self.apply_offset(polled);
        if self.last_presented == Some(now) {
            return Some(now);
        }
        self.last_presented = Some(now);
        trace!(time = %now, sources = self.entries.len(), "presenting");

        for entry in &mut self.entries {
            if entry.source.is_synchronized() {
                entry.status = entry.source.present_at(now);
            }
        }
        Some(now)
    }

    fn apply_offset(&self, now: FrameTimeWithRate) -> FrameTimeWithRate {
        FrameTimeWithRate::new(now.rate, now.time + self.global_time_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Registrable, Registry, TimedSource};
    use crate::time::{FrameRate, Timecode};
    use parking_lot::Mutex;

    struct Script {
        rate: FrameRate,
        timecode: Mutex<Option<Timecode>>,
    }

    impl Registrable for Script {
        fn id(&self) -> SourceId {
            SourceId::from("script")
        }

        fn friendly_name(&self) -> String {
            "script".into()
        }
    }

    impl TimecodeSource for Script {
        fn frame_rate(&self) -> FrameRate {
            self.rate
        }

        fn try_poll_timecode(&self) -> Option<(FrameRate, Timecode)> {
            self.timecode.lock().map(|tc| (self.rate, tc))
        }
    }

    fn reference(rate: FrameRate, frame: i32) -> Arc<Script> {
        Arc::new(Script {
            rate,
            timecode: Mutex::new(Some(Timecode::from_frame_time(
                rate,
                FrameTime::from_frame(frame),
            ))),
        })
    }

    fn source(
        registry: &Registry<dyn TimedDataSource>,
        id: &str,
        rate: FrameRate,
    ) -> TimedSource<u32> {
        let source = TimedSource::new(SourceId::from(id), id).with_frame_rate(rate);
        assert!(source.enable(registry));
        source
    }

    #[test]
    fn add_marks_synchronized_and_remove_releases() {
        let registry = Registry::new();
        let mut sync = Synchronizer::new();
        let a = source(&registry, "a", FrameRate::default());
        assert!(sync.add_source(Arc::new(a.clone())));
        assert!(!sync.add_source(Arc::new(a.clone())));
        assert!(a.is_synchronized());
        assert_eq!(sync.source_status(0), Some(TimedSampleStatus::DataMissing));

        assert!(sync.remove_source(&SourceId::from("a")).is_some());
        assert!(!a.is_synchronized());
        assert_eq!(sync.source_count(), 0);
    }

    #[test]
    fn no_reference_leaves_sources_missing() {
        let registry = Registry::new();
        let mut sync = Synchronizer::new();
        let a = source(&registry, "a", FrameRate::default());
        sync.add_source(Arc::new(a.clone()));
        assert!(sync.update().is_none());
        assert_eq!(sync.source_status(0), Some(TimedSampleStatus::DataMissing));
    }

    #[test]
    fn presents_remapped_time_with_offset() {
        let rate = FrameRate::default();
        let registry = Registry::new();
        let mut sync = Synchronizer::new();
        sync.set_reference(Some(reference(rate, 100)));
        sync.set_global_time_offset(FrameTime::from_frame(-2));

        let a = source(&registry, "a", FrameRate::new(48, 1).unwrap());
        let b = source(&registry, "b", rate);
        sync.add_source(Arc::new(a.clone()));
        sync.add_source(Arc::new(b.clone()));

        a.add_sample(1, FrameTime::from_frame(196));
        b.add_sample(2, FrameTime::from_frame(90));

        let now = sync.update().unwrap();
        assert_eq!(now.time, FrameTime::from_frame(98));
        assert_eq!(sync.source_status(0), Some(TimedSampleStatus::Ok));
        assert_eq!(sync.source_status(1), Some(TimedSampleStatus::Ahead));
    }

    #[test]
    fn same_time_is_not_presented_twice() {
        let rate = FrameRate::default();
        let registry = Registry::new();
        let mut sync = Synchronizer::new();
        let script = reference(rate, 10);
        sync.set_reference(Some(script.clone()));

        let a = source(&registry, "a", rate);
        sync.add_source(Arc::new(a.clone()));
        a.add_sample(7, FrameTime::from_frame(10));

        let presented = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&presented);
        let _sub = a.on_frame_presented(move |frame| log.lock().push(frame.time.time));

        sync.update();
        sync.update();
        *script.timecode.lock() = Some(Timecode::from_frame_time(rate, FrameTime::from_frame(11)));
        a.add_sample(8, FrameTime::from_frame(11));
        sync.update();

        assert_eq!(
            *presented.lock(),
            vec![FrameTime::from_frame(10), FrameTime::from_frame(11)]
        );
    }

    #[test]
    fn pause_hands_sources_back() {
        let rate = FrameRate::default();
        let registry = Registry::new();
        let mut sync = Synchronizer::new();
        sync.set_reference(Some(reference(rate, 0)));
        let a = source(&registry, "a", rate);
        sync.add_source(Arc::new(a.clone()));

        sync.pause();
        assert!(!a.is_synchronized());
        assert!(sync.update().is_none());

        sync.resume();
        assert!(a.is_synchronized());
        assert!(sync.update().is_some());
    }
}
