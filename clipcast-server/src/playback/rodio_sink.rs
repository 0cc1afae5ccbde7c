//! rodio-backed audio sink
//!
//! Real output on the host's default device. One rodio `Sink` per sound
//! gives per-instance volume and speed, so this sink supports virtual
//! volume cooperation natively. The `OutputStream` is not thread-safe;
//! a dedicated thread opens it and keeps it alive for the life of the
//! process while the cheaply-cloneable mixer handle is shared.

use std::collections::HashMap;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rodio::OutputStreamBuilder;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::playback::sink::{ActiveSound, AudioSink, SinkPlayRequest, StopCause};

struct SoundEntry {
    sink: Arc<rodio::Sink>,
    stopped: Arc<AtomicBool>,
}

pub struct RodioSink {
    mixer: rodio::mixer::Mixer,
    sounds: Arc<Mutex<HashMap<Uuid, SoundEntry>>>,
}

impl RodioSink {
    /// Open the default output device.
    ///
    /// The stream itself lives on a parked thread; only the mixer handle
    /// crosses back.
    pub fn open() -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("clipcast-audio".into())
            .spawn(move || match OutputStreamBuilder::open_default_stream() {
                Ok(stream) => {
                    let _ = tx.send(Ok(stream.mixer().clone()));
                    // The stream must outlive every sound; park for the
                    // life of the process.
                    loop {
                        std::thread::park();
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(Error::Sink(format!(
                        "failed to open audio output: {e}"
                    ))));
                }
            })?;

        let mixer = rx
            .recv()
            .map_err(|_| Error::Sink("audio thread died during startup".into()))??;

        info!("Audio output opened");
        Ok(Self {
            mixer,
            sounds: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SoundEntry>> {
        self.sounds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, req: SinkPlayRequest) -> Result<ActiveSound> {
        let id = Uuid::new_v4();
        let mixer = self.mixer.clone();

        // Decoder setup touches the filesystem; keep it off the runtime.
        let source_path = req.source.clone();
        let sink = tokio::task::spawn_blocking(move || -> Result<rodio::Sink> {
            let file = std::fs::File::open(&source_path)?;
            let source = rodio::Decoder::new(BufReader::new(file))
                .map_err(|e| Error::Sink(format!("cannot decode {}: {e}", source_path.display())))?;
            let sink = rodio::Sink::connect_new(&mixer);
            sink.set_volume(req.volume);
            sink.set_speed(req.speed);
            sink.append(source);
            Ok(sink)
        })
        .await
        .map_err(|e| Error::Internal(format!("decoder task failed: {e}")))??;

        let sink = Arc::new(sink);
        let stopped = Arc::new(AtomicBool::new(false));
        self.lock().insert(
            id,
            SoundEntry {
                sink: Arc::clone(&sink),
                stopped: Arc::clone(&stopped),
            },
        );

        let (done_tx, done_rx) = oneshot::channel();
        let sounds = Arc::clone(&self.sounds);
        tokio::spawn(async move {
            let waiter = Arc::clone(&sink);
            if tokio::task::spawn_blocking(move || waiter.sleep_until_end())
                .await
                .is_err()
            {
                warn!("sound watcher task failed");
            }
            sounds
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            let cause = if stopped.load(Ordering::Relaxed) {
                StopCause::Stopped
            } else {
                StopCause::Completed
            };
            let _ = done_tx.send(cause);
        });

        Ok(ActiveSound { id, done: done_rx })
    }

    async fn stop(&self, sound_id: Uuid) {
        let entry = {
            let map = self.lock();
            map.get(&sound_id)
                .map(|e| (Arc::clone(&e.sink), Arc::clone(&e.stopped)))
        };
        if let Some((sink, stopped)) = entry {
            stopped.store(true, Ordering::Relaxed);
            sink.stop();
        }
    }

    async fn stop_all(&self) {
        let entries: Vec<(Arc<rodio::Sink>, Arc<AtomicBool>)> = self
            .lock()
            .values()
            .map(|e| (Arc::clone(&e.sink), Arc::clone(&e.stopped)))
            .collect();
        for (sink, stopped) in entries {
            stopped.store(true, Ordering::Relaxed);
            sink.stop();
        }
    }

    fn set_sound_volume(&self, sound_id: Uuid, volume: f32) -> bool {
        match self.lock().get(&sound_id) {
            Some(entry) => {
                entry.sink.set_volume(volume);
                true
            }
            None => false,
        }
    }
}
