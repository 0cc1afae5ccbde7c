//! Audio sink collaborator
//!
//! The playback capability consumed by the chain scheduler: start a
//! single clip, stop it, stop everything, and (optionally) adjust the
//! volume of an already-sounding instance in software — the "virtual
//! volume cooperation" extension. Each started sound reports its own
//! completion through a oneshot, tagged with whether it finished
//! naturally or was stopped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::Result;

/// Why a sound ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// Reached its natural end.
    Completed,
    /// Ended by `stop()`.
    Stopped,
}

/// One clip to start.
#[derive(Debug, Clone)]
pub struct SinkPlayRequest {
    pub clip_id: Uuid,
    /// Audio file to play.
    pub source: PathBuf,
    /// Clip length from metadata, for sinks that simulate playback.
    pub duration_ms: u64,
    /// Start volume, 0.0-1.0 (clip volume x effective master already
    /// folded in).
    pub volume: f32,
    /// Speed factor, > 0.
    pub speed: f32,
}

/// Handle to a started sound.
pub struct ActiveSound {
    pub id: Uuid,
    /// Resolves exactly once when the sound ends.
    pub done: oneshot::Receiver<StopCause>,
}

/// Playback capability.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, req: SinkPlayRequest) -> Result<ActiveSound>;

    /// Stop one sound; a completion tagged `Stopped` follows. Unknown ids
    /// are ignored.
    async fn stop(&self, sound_id: Uuid);

    /// Stop every sound this sink knows about.
    async fn stop_all(&self);

    /// Adjust the volume of an already-sounding instance. Returns false
    /// when the sound is gone (callers prune their rosters on that).
    fn set_sound_volume(&self, sound_id: Uuid, volume: f32) -> bool;
}

struct SimEntry {
    cancel: oneshot::Sender<()>,
    volume: f32,
}

/// Simulated sink: "plays" a clip by waiting out its scaled duration.
///
/// Used on hosts without an audio device (`--no-audio`) and as the base
/// of the test sink; supports virtual volume cooperation trivially.
pub struct TimerSink {
    sounds: Arc<Mutex<HashMap<Uuid, SimEntry>>>,
}

impl TimerSink {
    pub fn new() -> Self {
        Self {
            sounds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SimEntry>> {
        self.sounds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for TimerSink {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn scaled_duration_ms(duration_ms: u64, speed: f32) -> u64 {
    (duration_ms as f64 / f64::from(speed.max(0.01))) as u64
}

#[async_trait]
impl AudioSink for TimerSink {
    async fn play(&self, req: SinkPlayRequest) -> Result<ActiveSound> {
        let id = Uuid::new_v4();
        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.lock().insert(
            id,
            SimEntry {
                cancel: cancel_tx,
                volume: req.volume,
            },
        );

        let sounds = Arc::clone(&self.sounds);
        let length = scaled_duration_ms(req.duration_ms, req.speed);
        tokio::spawn(async move {
            let cause = tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(length)) => StopCause::Completed,
                _ = cancel_rx => StopCause::Stopped,
            };
            sounds.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            let _ = done_tx.send(cause);
        });

        Ok(ActiveSound { id, done: done_rx })
    }

    async fn stop(&self, sound_id: Uuid) {
        if let Some(entry) = self.lock().remove(&sound_id) {
            let _ = entry.cancel.send(());
        }
    }

    async fn stop_all(&self) {
        let drained: Vec<SimEntry> = self.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            let _ = entry.cancel.send(());
        }
    }

    fn set_sound_volume(&self, sound_id: Uuid, volume: f32) -> bool {
        match self.lock().get_mut(&sound_id) {
            Some(entry) => {
                entry.volume = volume;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink for scheduler/coordinator/volume tests.

    use super::*;

    #[derive(Debug, Clone)]
    pub struct PlayedRecord {
        pub sound_id: Uuid,
        pub clip_id: Uuid,
        pub volume: f32,
        pub speed: f32,
        pub started_at: tokio::time::Instant,
    }

    /// TimerSink behavior plus a record of every interaction.
    pub struct MockSink {
        inner: TimerSink,
        pub plays: Mutex<Vec<PlayedRecord>>,
        pub stops: Mutex<Vec<Uuid>>,
        pub volume_sets: Mutex<Vec<(Uuid, f32)>>,
    }

    impl MockSink {
        pub fn new() -> Self {
            Self {
                inner: TimerSink::new(),
                plays: Mutex::new(Vec::new()),
                stops: Mutex::new(Vec::new()),
                volume_sets: Mutex::new(Vec::new()),
            }
        }

        pub fn played_clips(&self) -> Vec<Uuid> {
            self.plays.lock().unwrap().iter().map(|p| p.clip_id).collect()
        }
    }

    #[async_trait]
    impl AudioSink for MockSink {
        async fn play(&self, req: SinkPlayRequest) -> Result<ActiveSound> {
            let clip_id = req.clip_id;
            let volume = req.volume;
            let speed = req.speed;
            let sound = self.inner.play(req).await?;
            self.plays.lock().unwrap().push(PlayedRecord {
                sound_id: sound.id,
                clip_id,
                volume,
                speed,
                started_at: tokio::time::Instant::now(),
            });
            Ok(sound)
        }

        async fn stop(&self, sound_id: Uuid) {
            self.stops.lock().unwrap().push(sound_id);
            self.inner.stop(sound_id).await;
        }

        async fn stop_all(&self) {
            self.inner.stop_all().await;
        }

        fn set_sound_volume(&self, sound_id: Uuid, volume: f32) -> bool {
            self.volume_sets.lock().unwrap().push((sound_id, volume));
            self.inner.set_sound_volume(sound_id, volume)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_sink_completes_after_scaled_duration() {
        let sink = TimerSink::new();
        let sound = sink
            .play(SinkPlayRequest {
                clip_id: Uuid::new_v4(),
                source: PathBuf::from("unused"),
                duration_ms: 2000,
                volume: 1.0,
                speed: 2.0,
            })
            .await
            .unwrap();

        // 2000ms at 2x speed runs for 1000ms
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(sound.done.await.unwrap(), StopCause::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_sink_stop_reports_stopped() {
        let sink = TimerSink::new();
        let sound = sink
            .play(SinkPlayRequest {
                clip_id: Uuid::new_v4(),
                source: PathBuf::from("unused"),
                duration_ms: 5000,
                volume: 1.0,
                speed: 1.0,
            })
            .await
            .unwrap();

        sink.stop(sound.id).await;
        assert_eq!(sound.done.await.unwrap(), StopCause::Stopped);
        // Gone from the roster afterwards
        assert!(!sink.set_sound_volume(sound.id, 0.5));
    }
}
