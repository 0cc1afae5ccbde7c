//! Speech trigger recognition
//!
//! Normalization of transcribed text, the incremental trigger matcher,
//! the transcription collaborator boundary, and the live listener task
//! that turns matches into playback commands.

pub mod listener;
pub mod matcher;
pub mod normalize;
pub mod transcriber;

pub use matcher::{Candidate, MatchHit, MatchTarget, SpeechMatcher, TranscriptEvent};
pub use transcriber::{NullTranscriber, RecognizerEvent, Transcriber, TranscriberOptions};
