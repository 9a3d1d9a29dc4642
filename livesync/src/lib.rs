//! Frame-accurate time alignment for live capture devices.
//!
//! `livesync` aligns samples produced independently by cameras, motion
//! capture rigs and audio timecode receivers onto one composite timeline, and
//! exchanges data and control state with remote companion processes over a
//! compact, negotiated binary protocol.
//!
//! The crate is layered leaves-first:
//!
//! - [`time`]: exact rational frame rates, frame times and SMPTE timecode.
//! - [`buffer`]: per-source jitter buffers with ahead/behind/missing lookups.
//! - [`source`]: registrable timed data sources and their registry.
//! - [`reference`]: LTC and NTP timecode providers.
//! - [`sync`]: genlock pulses and the per-tick synchronizer.
//! - [`net`] and [`protocol`]: transport below, negotiated message table above.
//! - [`companion`]: host and client control-plane endpoints.

// Allow the crate to reference itself as ::livesync for derive macro usage
extern crate self as livesync;

pub mod buffer;
pub mod companion;
pub mod config;
pub mod event;
pub mod net;
pub mod protocol;
pub mod reference;
pub mod source;
pub mod sync;
pub mod time;

mod trace;

pub use trace::{DEFAULT_DIRECTIVE, LOG_ENV, init_tracing, init_tracing_with};

#[doc(inline)]
pub use livesync_derive::FixedLayout;

#[doc(inline)]
pub use protocol::layout::FixedLayout;

// Items used by code generated with `#[derive(FixedLayout)]`.
#[doc(hidden)]
pub mod __private {
    pub use crate::protocol::WireError;
    pub use crate::protocol::layout::{FixedLayout, combine_layout_hash, ensure_len, fnv1a};
}
