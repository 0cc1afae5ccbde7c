//! # Clipcast Server Library
//!
//! Self-hosted audio-command server: a shared tree of named audio clips,
//! chain playback on the host's audio output, live SSE state broadcasting,
//! and optional voice-trigger matching over a transcription stream.
//!
//! **Architecture:** node tree (`library`) persisted through sqlx/sqlite
//! (`db`), playback chains and volume cooperation over a pluggable sink
//! (`playback`), incremental trigger matching (`speech`), an orchestrator
//! facade tying them together, and a thin axum HTTP/SSE transport (`api`).

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod media;
pub mod orchestrator;
pub mod playback;
pub mod speech;

pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
