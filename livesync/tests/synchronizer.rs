//! Synchronizer ticks driven by a scripted reference and a manual genlock.

use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;

use livesync::buffer::TimedSampleStatus;
use livesync::reference::system_clock::ClockKind;
use livesync::reference::{SystemClockSource, TimecodeSource};
use livesync::source::{
    FramePresented, Registrable, Registry, SourceId, TimedDataSource, TimedSource,
};
use livesync::sync::{Genlock, ManualPulse, SyncStatus, Synchronizer};
use livesync::time::{FrameRate, FrameTime, StandardFrameRate, Timecode};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        livesync::init_tracing();
    });
}

/// A reference whose timecode the test sets by hand.
struct Scripted {
    rate: FrameRate,
    timecode: Mutex<Option<Timecode>>,
}

impl Scripted {
    fn at(rate: FrameRate, frame: i32) -> Arc<Self> {
        let reference = Arc::new(Self {
            rate,
            timecode: Mutex::new(None),
        });
        reference.set(frame);
        reference
    }

    fn set(&self, frame: i32) {
        *self.timecode.lock() = Some(Timecode::from_frame_time(
            self.rate,
            FrameTime::from_frame(frame),
        ));
    }
}

impl Registrable for Scripted {
    fn id(&self) -> SourceId {
        SourceId::from("scripted".to_owned())
    }

    fn friendly_name(&self) -> String {
        "scripted".into()
    }
}

impl TimecodeSource for Scripted {
    fn frame_rate(&self) -> FrameRate {
        self.rate
    }

    fn try_poll_timecode(&self) -> Option<(FrameRate, Timecode)> {
        self.timecode.lock().map(|timecode| (self.rate, timecode))
    }
}

type Log = Arc<Mutex<Vec<FramePresented<u32>>>>;

fn camera(
    registry: &Registry<dyn TimedDataSource>,
    id: &str,
    rate: FrameRate,
) -> (TimedSource<u32>, Log) {
    let source = TimedSource::new(SourceId::from(id.to_owned()), id).with_frame_rate(rate);
    assert!(source.enable(registry));
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    source
        .on_frame_presented(move |frame| sink.lock().push(frame.clone()))
        .detach();
    (source, log)
}

fn fps(standard: StandardFrameRate) -> FrameRate {
    standard.into()
}

#[test]
fn genlock_advances_between_reference_updates() {
    init_test_tracing();
    let rate = fps(StandardFrameRate::Fps24);
    let registry = Registry::new();
    let (source, log) = camera(&registry, "camera", rate);

    let reference = Scripted::at(rate, 100);
    let mut sync = Synchronizer::new();
    sync.set_reference(Some(reference.clone()));
    sync.add_source(Arc::new(source.clone()));
    for frame in 100..=102 {
        source.add_sample(frame as u32, FrameTime::from_frame(frame));
    }

    let (provider, trigger) = ManualPulse::new(
        fps(StandardFrameRate::Fps48),
        Some(Duration::from_secs(1)),
    );
    let mut genlock = Genlock::new(provider);
    genlock.start();

    // Fresh timecode.
    trigger.pulse();
    assert!(genlock.wait_for_next_pulse());
    let now = sync.update_with_genlock(&genlock).unwrap();
    assert_eq!(now.time, FrameTime::from_frame(100));
    assert_eq!(sync.source_status(0), Some(TimedSampleStatus::Ok));

    // Same timecode: advance by one 48 fps pulse, half a frame at 24 fps.
    trigger.pulse();
    assert!(genlock.wait_for_next_pulse());
    let now = sync.update_with_genlock(&genlock).unwrap();
    assert_eq!(now.rate, rate);
    assert!((now.time.as_f64() - 100.5).abs() < 1e-9);

    // Two pulses since the last tick: one is reported dropped.
    trigger.pulses(2);
    assert!(genlock.wait_for_next_pulse());
    assert_eq!(genlock.last_pulse_count_delta(), Some(2));
    assert_eq!(genlock.dropped_frame_count(), 1);
    let now = sync.update_with_genlock(&genlock).unwrap();
    assert!((now.time.as_f64() - 101.5).abs() < 1e-9);

    // A new reference timecode wins over the pulse delta.
    reference.set(110);
    trigger.pulse();
    assert!(genlock.wait_for_next_pulse());
    let now = sync.update_with_genlock(&genlock).unwrap();
    assert_eq!(now.time, FrameTime::from_frame(110));
    assert_eq!(sync.source_status(0), Some(TimedSampleStatus::Ahead));

    // Without a pulse the held time stays put and nothing is re-presented.
    trigger.lose_signal();
    assert!(!genlock.wait_for_next_pulse());
    assert_eq!(genlock.status(), SyncStatus::NotSynchronized);
    let presented = log.lock().len();
    assert_eq!(
        sync.update_with_genlock(&genlock).unwrap().time,
        FrameTime::from_frame(110)
    );
    assert_eq!(log.lock().len(), presented);

    let log = log.lock();
    let values: Vec<u32> = log.iter().map(|frame| frame.value).collect();
    assert_eq!(values, vec![100, 100, 101, 102]);
    assert_eq!(log.last().map(|frame| frame.status), Some(TimedSampleStatus::Ahead));
}

#[test]
fn sources_at_mixed_rates_share_one_present_time() {
    init_test_tracing();
    let reference_rate = fps(StandardFrameRate::Fps24);
    let registry = Registry::new();
    let (fast, fast_log) = camera(&registry, "fast", fps(StandardFrameRate::Fps48));
    let (slow, slow_log) = camera(&registry, "slow", reference_rate);

    let mut sync = Synchronizer::new();
    sync.set_reference(Some(Scripted::at(reference_rate, 50)));
    for source in registry.iter() {
        assert!(sync.add_source(source));
    }
    assert_eq!(sync.source_count(), 2);

    // The slow device reports two frames late.
    slow.set_offset(FrameTime::from_frame(2));
    fast.add_sample(1, FrameTime::from_frame(100));
    slow.add_sample(2, FrameTime::from_frame(48));

    sync.update().unwrap();
    let last = |log: &Log| log.lock().last().map(|f| (f.value, f.time.time));
    assert_eq!(last(&fast_log), Some((1, FrameTime::from_frame(100))));
    assert_eq!(last(&slow_log), Some((2, FrameTime::from_frame(50))));
    for index in 0..2 {
        assert_eq!(sync.source_status(index), Some(TimedSampleStatus::Ok));
    }
}

#[test]
fn global_offset_shifts_every_source() {
    init_test_tracing();
    let rate = fps(StandardFrameRate::Fps25);
    let registry = Registry::new();
    let (source, log) = camera(&registry, "delayed", rate);

    let mut sync = Synchronizer::new();
    sync.set_reference(Some(Scripted::at(rate, 100)));
    sync.set_global_time_offset(FrameTime::from_frame(-5));
    sync.add_source(Arc::new(source.clone()));
    source.add_sample(7, FrameTime::from_frame(95));

    assert_eq!(sync.update().unwrap().time, FrameTime::from_frame(95));
    assert_eq!(sync.current_time().unwrap().time, FrameTime::from_frame(95));
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn unsynchronized_source_presents_on_arrival() {
    init_test_tracing();
    let rate = fps(StandardFrameRate::Fps30);
    let registry = Registry::new();
    let (source, log) = camera(&registry, "free", rate);

    let mut sync = Synchronizer::new();
    sync.set_reference(Some(Scripted::at(rate, 0)));
    sync.add_source(Arc::new(source.clone()));
    sync.pause();

    source.add_sample(5, FrameTime::from_frame(1000));
    assert!(sync.update().is_none());

    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, TimedSampleStatus::Ok);
    assert_eq!(log[0].time.time, FrameTime::from_frame(1000));
}

#[test]
fn missing_reference_leaves_sources_missing() {
    init_test_tracing();
    let registry = Registry::new();
    let (source, log) = camera(&registry, "orphan", FrameRate::default());

    let mut sync = Synchronizer::new();
    sync.add_source(Arc::new(source.clone()));
    source.add_sample(1, FrameTime::from_frame(0));
    for _ in 0..3 {
        assert!(sync.update().is_none());
    }
    assert_eq!(sync.source_status(0), Some(TimedSampleStatus::DataMissing));
    assert!(log.lock().is_empty());
}

#[test]
fn monotonic_clock_reference_moves_forward() {
    init_test_tracing();
    let rate = fps(StandardFrameRate::Fps60);
    let clock =
        SystemClockSource::new(SourceId::generate(), "local", rate).with_kind(ClockKind::Monotonic);

    let mut sync = Synchronizer::new();
    sync.set_reference(Some(Arc::new(clock)));
    let first = sync.update().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let second = sync.update().unwrap();

    assert_eq!(second.rate, rate);
    assert!(second.time > first.time);
}
