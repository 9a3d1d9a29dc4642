//! Network time reference.
//!
//! [`NtpClient`] performs single SNTP request/reply exchanges and estimates
//! the offset between the local and server clocks from the four packet
//! timestamps. [`NtpTimecodeSource`] runs those exchanges off the tick thread
//! and turns the extrapolated server time into time-of-day timecode.

pub mod client;
pub mod packet;
pub mod source;

pub use client::{NtpClient, NtpSample};
pub use packet::{LeapIndicator, Mode, NtpPacket, NtpTimestamp};
pub use source::NtpTimecodeSource;
