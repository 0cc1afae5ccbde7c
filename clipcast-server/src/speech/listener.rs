//! Live voice-trigger listener
//!
//! Optional task that consumes the transcription collaborator's live
//! stream, matches it against the voice-activated clips of the tree, and
//! fires playback commands hands-free. The candidate set follows the
//! tree: every TreeChanged event re-collects it and refreshes the
//! backend's hint phrases.

use std::collections::HashMap;
use std::sync::Arc;

use clipcast_common::events::ClipcastEvent;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, VOICE_REQUESTER};
use crate::speech::matcher::{MatchHit, MatchTarget, SpeechMatcher};
use crate::speech::transcriber::RecognizerEvent;

pub fn spawn(orchestrator: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(run(orchestrator))
}

pub async fn run(orchestrator: Arc<Orchestrator>) {
    let transcriber = orchestrator.transcriber();
    let (mut candidates, mut probabilities, options) = match orchestrator.voice_candidates().await
    {
        Ok(collected) => collected,
        Err(e) => {
            warn!("voice listener could not collect candidates: {e}");
            return;
        }
    };

    let mut stream = match transcriber.start(options).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("voice listener could not start transcription: {e}");
            return;
        }
    };

    let bus = orchestrator.event_bus();
    let mut tree_events = bus.subscribe();
    let mut matcher = SpeechMatcher::new();
    info!(
        "voice listener running with {} clip candidates",
        candidates.len().saturating_sub(1)
    );

    loop {
        tokio::select! {
            event = stream.recv() => match event {
                Some(RecognizerEvent::Transcript(transcript)) => {
                    if let Some(hit) = matcher.push(&transcript, &candidates) {
                        fire(&orchestrator, &probabilities, hit).await;
                    }
                }
                Some(RecognizerEvent::Ended) | None => {
                    info!("transcription stream ended; voice listener exiting");
                    return;
                }
            },
            tree = tree_events.recv() => match tree {
                Ok(ClipcastEvent::TreeChanged { .. }) | Err(RecvError::Lagged(_)) => {
                    match orchestrator.voice_candidates().await {
                        Ok((new_candidates, new_probabilities, options)) => {
                            candidates = new_candidates;
                            probabilities = new_probabilities;
                            if let Err(e) = transcriber.update_options(options).await {
                                warn!("could not refresh transcriber hints: {e}");
                            }
                        }
                        Err(e) => warn!("could not refresh voice candidates: {e}"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Closed) => return,
            }
        }
    }
}

async fn fire(
    orchestrator: &Arc<Orchestrator>,
    probabilities: &HashMap<Uuid, f32>,
    hit: MatchHit,
) {
    let bus = orchestrator.event_bus();
    match hit.target {
        MatchTarget::Stop => {
            info!("voice stop: {:?}", hit.spoken);
            orchestrator.stop_all();
            bus.emit_lossy(ClipcastEvent::SpeechTriggered {
                clip_id: None,
                spoken: hit.spoken,
                timestamp: chrono::Utc::now(),
            });
        }
        MatchTarget::Clip(clip_id) => {
            let probability = probabilities.get(&clip_id).copied().unwrap_or(1.0);
            if probability < 1.0 && rand::thread_rng().gen::<f32>() > probability {
                debug!("trigger for {clip_id} suppressed by probability {probability}");
                return;
            }
            match orchestrator.play_clip(VOICE_REQUESTER, clip_id).await {
                Ok(_) => {
                    info!("voice trigger fired clip {clip_id}: {:?}", hit.spoken);
                    bus.emit_lossy(ClipcastEvent::SpeechTriggered {
                        clip_id: Some(clip_id),
                        spoken: hit.spoken,
                        timestamp: chrono::Utc::now(),
                    });
                }
                Err(e) => warn!("voice trigger for {clip_id} failed: {e}"),
            }
        }
    }
}
