//! Playback session coordinator
//!
//! Registry of live chains and the aggregated "now playing" view. Chain
//! transitions arrive over a channel and are applied by a dedicated task:
//! sink completion callbacks therefore never enter the session section
//! (or the tree section) from the sink's own execution context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use clipcast_common::api::NowPlayingEntry;
use clipcast_common::events::{ClipcastEvent, EventBus};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::playback::chain::{self, ChainHandle, ChainTransition, ResolvedStep, StopKind};
use crate::playback::sink::AudioSink;
use crate::playback::volume::VolumeCoordinator;

struct Session {
    requester: String,
    sounding: Vec<Uuid>,
    handle: ChainHandle,
}

pub struct PlaybackCoordinator {
    sink: Arc<dyn AudioSink>,
    volume: Arc<VolumeCoordinator>,
    bus: EventBus,
    /// The session section: exclusive, never held across await.
    sessions: Mutex<HashMap<Uuid, Session>>,
    transitions_tx: mpsc::UnboundedSender<ChainTransition>,
}

impl PlaybackCoordinator {
    pub fn new(
        sink: Arc<dyn AudioSink>,
        volume: Arc<VolumeCoordinator>,
        bus: EventBus,
    ) -> Arc<Self> {
        let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            sink,
            volume,
            bus,
            sessions: Mutex::new(HashMap::new()),
            transitions_tx,
        });
        tokio::spawn(consume_transitions(
            Arc::downgrade(&coordinator),
            transitions_rx,
        ));
        coordinator
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a chain for a resolved request; returns its handle id.
    pub fn play(&self, requester: String, steps: Vec<ResolvedStep>) -> Uuid {
        let chain_id = Uuid::new_v4();
        // Register the session before the task exists: the chain's first
        // transition must find its entry.
        let (handle, stop_rx) = chain::handle_pair(chain_id);
        self.lock().insert(
            chain_id,
            Session {
                requester,
                sounding: Vec::new(),
                handle,
            },
        );
        chain::spawn(
            chain_id,
            steps,
            Arc::clone(&self.sink),
            Arc::clone(&self.volume),
            self.transitions_tx.clone(),
            stop_rx,
        );
        chain_id
    }

    /// Stop one chain. Unknown ids are a no-op (the chain already
    /// finished).
    pub fn stop_chain(&self, chain_id: Uuid) {
        if let Some(session) = self.lock().get(&chain_id) {
            session.handle.stop(StopKind::Local);
        }
    }

    /// Global stop: stop every chain, clear the registry, and push one
    /// empty aggregate. Always succeeds, with or without active chains;
    /// idempotent.
    pub fn stop_all(&self) {
        let drained: Vec<Session> = self.lock().drain().map(|(_, s)| s).collect();
        debug!("global stop of {} chains", drained.len());
        for session in &drained {
            session.handle.stop(StopKind::Global);
        }
        self.push_aggregate(Vec::new());
    }

    /// Current union of (requester, clip) pairs across all live chains.
    pub fn now_playing(&self) -> Vec<NowPlayingEntry> {
        aggregate(&self.lock())
    }

    fn push_aggregate(&self, entries: Vec<NowPlayingEntry>) {
        self.bus.emit_lossy(ClipcastEvent::NowPlaying {
            entries,
            timestamp: chrono::Utc::now(),
        });
    }

    fn apply_transition(&self, transition: ChainTransition) {
        let entries = {
            let mut sessions = self.lock();
            if transition.terminal {
                let existed = sessions.remove(&transition.chain_id).is_some();
                // The global stop pushes its single empty aggregate
                // itself; per-chain terminals of it (and terminals of
                // chains the registry already forgot) would double-count.
                if transition.stopped == Some(StopKind::Global) || !existed {
                    return;
                }
            } else {
                match sessions.get_mut(&transition.chain_id) {
                    Some(session) => session.sounding = transition.sounding,
                    // Transition raced a global stop; the registry no
                    // longer knows the chain.
                    None => return,
                }
            }
            aggregate(&sessions)
        };
        self.push_aggregate(entries);
    }
}

fn aggregate(sessions: &HashMap<Uuid, Session>) -> Vec<NowPlayingEntry> {
    let mut entries: Vec<NowPlayingEntry> = sessions
        .values()
        .flat_map(|s| {
            s.sounding.iter().map(|clip_id| NowPlayingEntry {
                requester: s.requester.clone(),
                clip_id: *clip_id,
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        (a.requester.as_str(), a.clip_id).cmp(&(b.requester.as_str(), b.clip_id))
    });
    entries.dedup();
    entries
}

async fn consume_transitions(
    coordinator: Weak<PlaybackCoordinator>,
    mut rx: mpsc::UnboundedReceiver<ChainTransition>,
) {
    while let Some(transition) = rx.recv().await {
        match coordinator.upgrade() {
            Some(coordinator) => coordinator.apply_transition(transition),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::chain::ResolvedStep;
    use crate::playback::sink::testing::MockSink;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;
    use std::time::Duration;

    async fn setup() -> (Arc<PlaybackCoordinator>, Arc<MockSink>, EventBus) {
        // DB setup performs real blocking I/O on sqlx's background connection
        // threads. Under `start_paused` the test's auto-advancing clock races
        // ahead to the pool's acquire timeout before those threads report
        // back (PoolTimedOut). Run the DB setup on a dedicated runtime off the
        // paused test runtime so the paused clock is never touched.
        let sink = Arc::new(MockSink::new());
        let bus = EventBus::new(64);
        let volume = {
            let sink = sink.clone();
            let bus = bus.clone();
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async move {
                    let pool = SqlitePoolOptions::new()
                        .connect("sqlite::memory:")
                        .await
                        .unwrap();
                    crate::db::init::initialize_database(&pool).await.unwrap();
                    VolumeCoordinator::load(pool, sink, bus).await.unwrap()
                })
            })
            .join()
            .unwrap()
        };
        let coordinator = PlaybackCoordinator::new(sink.clone(), volume, bus.clone());
        (coordinator, sink, bus)
    }

    fn step(clip_id: Uuid, duration_ms: u64) -> ResolvedStep {
        ResolvedStep {
            clip_id,
            source: PathBuf::from("unused"),
            duration_ms,
            volume: 100,
            speed: 1.0,
            delay_ms: 0,
            clip_on_overlap: false,
        }
    }

    async fn next_now_playing(
        rx: &mut tokio::sync::broadcast::Receiver<ClipcastEvent>,
    ) -> Vec<NowPlayingEntry> {
        loop {
            if let ClipcastEvent::NowPlaying { entries, .. } = rx.recv().await.unwrap() {
                return entries;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_unions_chains_by_requester() {
        let (coordinator, _sink, bus) = setup().await;
        let mut rx = bus.subscribe();

        let clip_a = Uuid::new_v4();
        let clip_b = Uuid::new_v4();
        coordinator.play("alice".into(), vec![step(clip_a, 5000)]);
        coordinator.play("bob".into(), vec![step(clip_b, 5000)]);

        // Wait until both chains appear in one aggregate
        let mut entries = Vec::new();
        for _ in 0..4 {
            entries = next_now_playing(&mut rx).await;
            if entries.len() == 2 {
                break;
            }
        }
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.requester == "alice" && e.clip_id == clip_a));
        assert!(entries
            .iter()
            .any(|e| e.requester == "bob" && e.clip_id == clip_b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_chain_leaves_aggregate() {
        let (coordinator, _sink, bus) = setup().await;
        let mut rx = bus.subscribe();

        coordinator.play("alice".into(), vec![step(Uuid::new_v4(), 500)]);

        let playing = next_now_playing(&mut rx).await;
        assert_eq!(playing.len(), 1);

        let after = next_now_playing(&mut rx).await;
        assert!(after.is_empty());
        assert!(coordinator.now_playing().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_stop_pushes_single_empty_aggregate() {
        let (coordinator, _sink, bus) = setup().await;

        coordinator.play("alice".into(), vec![step(Uuid::new_v4(), 60_000)]);
        coordinator.play("bob".into(), vec![step(Uuid::new_v4(), 60_000)]);
        // Let the chains report in
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut rx = bus.subscribe();
        coordinator.stop_all();
        // Drain the chain terminations
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut empties = 0;
        while let Ok(event) = rx.try_recv() {
            if let ClipcastEvent::NowPlaying { entries, .. } = event {
                assert!(entries.is_empty());
                empties += 1;
            }
        }
        assert_eq!(empties, 1, "one aggregate push for the whole stop-all");
        assert!(coordinator.now_playing().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_stop_without_chains_succeeds() {
        let (coordinator, _sink, bus) = setup().await;
        let mut rx = bus.subscribe();

        coordinator.stop_all();
        coordinator.stop_all();

        assert_eq!(next_now_playing(&mut rx).await, Vec::new());
        assert_eq!(next_now_playing(&mut rx).await, Vec::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stop_of_one_chain_keeps_others() {
        let (coordinator, _sink, bus) = setup().await;
        let mut rx = bus.subscribe();

        let clip_a = Uuid::new_v4();
        let clip_b = Uuid::new_v4();
        let chain_a = coordinator.play("alice".into(), vec![step(clip_a, 60_000)]);
        coordinator.play("bob".into(), vec![step(clip_b, 60_000)]);

        let mut entries = Vec::new();
        for _ in 0..4 {
            entries = next_now_playing(&mut rx).await;
            if entries.len() == 2 {
                break;
            }
        }
        assert_eq!(entries.len(), 2);

        coordinator.stop_chain(chain_a);
        let after = next_now_playing(&mut rx).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].clip_id, clip_b);
    }
}
