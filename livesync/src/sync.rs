//! Genlock pulses and the per-tick synchronizer.
//!
//! A tick loop typically looks like:
//!
//! ```no_run
//! use livesync::sync::{FreeRunClock, Genlock, Synchronizer};
//! use livesync::time::FrameRate;
//!
//! let mut genlock = Genlock::new(FreeRunClock::new(FrameRate::default()));
//! let mut synchronizer = Synchronizer::new();
//! genlock.start();
//! while genlock.wait_for_next_pulse() {
//!     synchronizer.update_with_genlock(&genlock);
//! }
//! ```

pub mod genlock;
pub mod synchronizer;

pub use genlock::{FreeRunClock, Genlock, ManualPulse, PulseTrigger, SyncProvider, SyncStatus};
pub use synchronizer::Synchronizer;
