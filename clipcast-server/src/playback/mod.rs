//! Playback engine
//!
//! The sink collaborator boundary, the per-request chain scheduler, the
//! session coordinator with its aggregated now-playing view, and the
//! two-tier volume cooperation.

pub mod chain;
pub mod coordinator;
pub mod rodio_sink;
pub mod sink;
pub mod volume;

pub use chain::{ChainHandle, ChainTransition, ResolvedStep, StopKind};
pub use coordinator::PlaybackCoordinator;
pub use rodio_sink::RodioSink;
pub use sink::{ActiveSound, AudioSink, SinkPlayRequest, StopCause, TimerSink};
pub use volume::{VolumeCoordinator, VolumeView};
