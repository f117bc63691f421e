//! Audio capture providers.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod m500;
pub mod source;

pub use source::{AudioSource, MockAudioSource};
