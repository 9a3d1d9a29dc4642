//! Control-plane endpoints for companion devices.
//!
//! A [`CompanionHost`] runs in the capture process. It owns the message
//! table, sends it to each companion that connects and then pushes state
//! (recording, player, frame rate, takes) while raising callbacks for the
//! companion's control requests. A [`CompanionClient`] runs on the device:
//! it is built from the host's table and does the inverse.
//!
//! One host or client serves exactly one connection.

pub mod client;
pub mod host;
pub mod messages;
pub mod state;
pub mod take;

pub use client::CompanionClient;
pub use host::CompanionHost;
pub use state::{DeviceMode, PlayerState, ServerState};
pub use take::{TakeDescriptor, TakeId};
