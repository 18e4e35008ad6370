#![cfg_attr(not(feature = "std"), no_std)]

pub mod clock;
#[cfg(feature = "std")]
pub mod command;
pub mod layout;

pub use clock::{absolute, VirtualClock, DEFAULT_DEFERENCE_BUFFER_US, ROLLOVER_SENTINEL};
#[cfg(feature = "std")]
pub use command::{is_empty_payload, Command, EffectSpec, ProtocolError, RECOGNIZED_KEYS};
pub use layout::ChannelLayout;
