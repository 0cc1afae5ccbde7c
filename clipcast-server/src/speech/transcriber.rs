//! Transcription collaborator
//!
//! The boundary to whatever speech-to-text backend the deployment wires
//! in. The server only consumes the event stream shape; no specific
//! backend is assumed. `NullTranscriber` ships as the default wiring for
//! hosts without one.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Result;
use crate::speech::matcher::TranscriptEvent;

/// Recognition session options.
#[derive(Debug, Clone, Default)]
pub struct TranscriberOptions {
    /// Languages to recognize, BCP-47-ish codes.
    pub languages: Vec<String>,
    /// Phrases the backend should bias towards (trigger and hint
    /// phrases of the current candidate set).
    pub hint_phrases: Vec<String>,
}

/// Events produced by a recognition session.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    Transcript(TranscriptEvent),
    /// The session is over; no further events follow.
    Ended,
}

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Begin live recognition; events flow until `stop` or backend end.
    async fn start(&self, options: TranscriberOptions) -> Result<mpsc::Receiver<RecognizerEvent>>;

    /// One-shot recognition over a submitted audio buffer.
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        options: TranscriberOptions,
    ) -> Result<mpsc::Receiver<RecognizerEvent>>;

    /// Replace the options of a running live session (hint phrases
    /// change when the candidate set does).
    async fn update_options(&self, options: TranscriberOptions) -> Result<()>;

    /// End the live session. Idempotent.
    async fn stop(&self);
}

/// Backend-less default: every session ends immediately.
pub struct NullTranscriber;

impl NullTranscriber {
    fn ended_stream() -> mpsc::Receiver<RecognizerEvent> {
        let (tx, rx) = mpsc::channel(1);
        // Buffered send on a fresh channel cannot fail
        let _ = tx.try_send(RecognizerEvent::Ended);
        rx
    }
}

#[async_trait]
impl Transcriber for NullTranscriber {
    async fn start(&self, _options: TranscriberOptions) -> Result<mpsc::Receiver<RecognizerEvent>> {
        warn!("no transcription backend configured; voice triggers are inactive");
        Ok(Self::ended_stream())
    }

    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        _options: TranscriberOptions,
    ) -> Result<mpsc::Receiver<RecognizerEvent>> {
        warn!("no transcription backend configured; speech test returns no transcripts");
        Ok(Self::ended_stream())
    }

    async fn update_options(&self, _options: TranscriberOptions) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}
}
