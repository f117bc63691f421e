//! The sound stream pipeline: source → process → target.

pub mod item;
pub mod manager;
pub mod process;
pub mod source;
pub mod stage;
pub mod target;

pub use item::{StreamItem, TimedBuffer};
pub use manager::{StreamConfig, StreamManager};
pub use process::{DetectProcess, HangoverConfig};
pub use source::PcmSource;
pub use stage::{ProcessStage, SourceStage, StageError, TargetStage};
pub use target::{WavTarget, WavTargetConfig};
