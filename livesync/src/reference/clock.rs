use std::sync::Arc;

use super::TimecodeSource;
use crate::time::{FrameRate, FrameTimeWithRate, Timecode};
use crate::trace::trace;

/// Per-tick holder of the authoritative present time.
///
/// Each [`update`](Self::update) polls the reference provider. A polled
/// timecode that differs from the previous poll always wins. When the poll
/// brings nothing new, the held time advances by the genlock pulse delta if
/// one is supplied, and otherwise stays where it is.
#[derive(Default)]
pub struct ReferenceClock {
    source: Option<Arc<dyn TimecodeSource>>,
    last_polled: Option<(FrameRate, Timecode)>,
    current: Option<FrameTimeWithRate>,
}

impl ReferenceClock {
    #[must_use]
    pub fn new(source: Option<Arc<dyn TimecodeSource>>) -> Self {
        Self {
            source,
            last_polled: None,
            current: None,
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&Arc<dyn TimecodeSource>> {
        self.source.as_ref()
    }

    /// Swaps the provider and forgets the held time.
    pub fn set_source(&mut self, source: Option<Arc<dyn TimecodeSource>>) {
        self.source = source;
        self.last_polled = None;
        self.current = None;
    }

    #[must_use]
    pub fn current(&self) -> Option<FrameTimeWithRate> {
        self.current
    }

    /// Advances one tick. `pulse_delta` is the time covered by the genlock
    /// pulses since the previous tick, when genlock is synchronized.
    pub fn update(&mut self, pulse_delta: Option<FrameTimeWithRate>) -> Option<FrameTimeWithRate> {
        let polled = self.source.as_ref().and_then(|s| s.try_poll_timecode());

        match (polled, self.current, pulse_delta) {
            (Some(polled), _, _) if self.last_polled != Some(polled) => {
                let (rate, timecode) = polled;
                self.last_polled = Some(polled);
                self.current = Some(FrameTimeWithRate::from_timecode(rate, &timecode));
                trace!(%timecode, "reference timecode");
            }
            (_, Some(current), Some(delta)) => {
                self.current = Some(current + delta);
            }
            _ => {}
        }

        self.current
    }
}
