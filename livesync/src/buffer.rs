//! Sample storage.
//!
//! - [`CircularBuffer`]: fixed-capacity ring with drop-oldest eviction.
//! - [`TimedDataBuffer`]: a ring of samples ordered by [`FrameTime`](crate::time::FrameTime)
//!   answering "what do you have at time T" with a [`SampleLookup`].
//! - [`Interpolator`]: optional blending between neighbouring samples.

pub mod circular;
pub mod interpolate;
pub mod timed;

pub use circular::CircularBuffer;
pub use interpolate::{Interpolator, LerpInterpolator};
pub use timed::{SampleLookup, TimedDataBuffer, TimedSample, TimedSampleStatus};
