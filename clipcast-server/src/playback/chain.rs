//! Playback chain scheduler
//!
//! One task per playback request, driving the clip sequence
//! `Idle -> Playing(0) -> ... -> Finished`. Advancement is either the
//! previous clip's natural completion (zero inter-clip delay) or a
//! single-shot cancellable timer (`scaled_length + delay`, floored at
//! zero). Negative delays start the next clip before the current one
//! ends; the clip-on-overlap flag cuts the current clip at that point
//! instead of letting the two sound together.
//!
//! Every transition is reported to the session coordinator: the set of
//! clips currently sounding, whether this is the terminal transition,
//! and for stops whether the stop was chain-local or global.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::playback::sink::{scaled_duration_ms, AudioSink, SinkPlayRequest, StopCause};
use crate::playback::volume::VolumeCoordinator;

/// Scope of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Stop of this chain only.
    Local,
    /// Part of a stop-all; the aggregator must not push a separate
    /// aggregate per chain.
    Global,
}

/// One fully resolved step of a chain.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub clip_id: Uuid,
    pub source: PathBuf,
    pub duration_ms: u64,
    /// Step volume, 1-100.
    pub volume: u8,
    /// Speed factor, > 0.
    pub speed: f32,
    pub delay_ms: i64,
    pub clip_on_overlap: bool,
}

/// A "playback changed" notification from one chain.
#[derive(Debug, Clone)]
pub struct ChainTransition {
    pub chain_id: Uuid,
    /// Clip ids currently sounding, deduplicated and ordered.
    pub sounding: Vec<Uuid>,
    pub terminal: bool,
    pub stopped: Option<StopKind>,
}

/// Control handle for a running chain.
pub struct ChainHandle {
    id: Uuid,
    stop_tx: watch::Sender<Option<StopKind>>,
}

impl ChainHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request a stop. Idempotent: the first call wins, later calls are
    /// no-ops.
    pub fn stop(&self, kind: StopKind) {
        self.stop_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(kind);
                true
            } else {
                false
            }
        });
    }
}

/// Create the control handle for a chain before its task exists, so the
/// caller can register it wherever transitions will be looked up.
pub fn handle_pair(chain_id: Uuid) -> (ChainHandle, watch::Receiver<Option<StopKind>>) {
    let (stop_tx, stop_rx) = watch::channel(None);
    (ChainHandle { id: chain_id, stop_tx }, stop_rx)
}

/// Start the scheduler task for one request.
pub fn spawn(
    chain_id: Uuid,
    steps: Vec<ResolvedStep>,
    sink: Arc<dyn AudioSink>,
    volume: Arc<VolumeCoordinator>,
    transitions: mpsc::UnboundedSender<ChainTransition>,
    stop_rx: watch::Receiver<Option<StopKind>>,
) {
    tokio::spawn(run_chain(
        chain_id,
        steps,
        sink,
        volume,
        transitions,
        stop_rx,
    ));
}

fn emit(
    tx: &mpsc::UnboundedSender<ChainTransition>,
    chain_id: Uuid,
    sounding: &HashMap<Uuid, Uuid>,
    terminal: bool,
    stopped: Option<StopKind>,
) {
    let set: BTreeSet<Uuid> = sounding.values().copied().collect();
    let _ = tx.send(ChainTransition {
        chain_id,
        sounding: set.into_iter().collect(),
        terminal,
        stopped,
    });
}

async fn run_chain(
    chain_id: Uuid,
    steps: Vec<ResolvedStep>,
    sink: Arc<dyn AudioSink>,
    volume: Arc<VolumeCoordinator>,
    transitions: mpsc::UnboundedSender<ChainTransition>,
    mut stop_rx: watch::Receiver<Option<StopKind>>,
) {
    // sound id -> clip id for everything currently sounding
    let mut sounding: HashMap<Uuid, Uuid> = HashMap::new();

    // An empty request resolves directly to Finished, with no
    // intermediate transition.
    if steps.is_empty() {
        emit(&transitions, chain_id, &sounding, true, None);
        return;
    }

    let mut ended: FuturesUnordered<BoxFuture<'static, (Uuid, StopCause)>> =
        FuturesUnordered::new();
    let mut next = 0usize;
    // Sound whose natural completion advances the chain (delay == 0)
    let mut advance_on: Option<Uuid> = None;
    // Sound to cut when the timer fires (negative delay + clip flag)
    let mut cut_on_fire: Option<Uuid> = None;
    let mut start_next = true;

    let timer = tokio::time::sleep(Duration::from_secs(0));
    tokio::pin!(timer);
    let mut timer_armed = false;

    loop {
        // Stop requests take effect at the next loop head, before any
        // further clip is started. Copy the state out so the watch read
        // guard never lives across an await.
        let stop_requested: Option<StopKind> = *stop_rx.borrow();
        if let Some(kind) = stop_requested {
            for (sound_id, _) in sounding.drain() {
                volume.unregister_sound(sound_id);
                sink.stop(sound_id).await;
            }
            emit(&transitions, chain_id, &sounding, true, Some(kind));
            return;
        }

        if start_next && next < steps.len() {
            start_next = false;
            let step = &steps[next];
            let index = next;
            next += 1;

            let play = sink
                .play(SinkPlayRequest {
                    clip_id: step.clip_id,
                    source: step.source.clone(),
                    duration_ms: step.duration_ms,
                    volume: volume.sink_gain(step.volume),
                    speed: step.speed,
                })
                .await;
            let sound = match play {
                Ok(sound) => sound,
                Err(e) => {
                    warn!(chain = %chain_id, step = index, "skipping unplayable step: {e}");
                    start_next = true;
                    continue;
                }
            };

            volume.register_sound(sound.id, f32::from(step.volume.min(100)) / 100.0);
            sounding.insert(sound.id, step.clip_id);
            let sound_id = sound.id;
            let done = sound.done;
            ended.push(Box::pin(async move {
                (sound_id, done.await.unwrap_or(StopCause::Stopped))
            }));

            if next < steps.len() {
                if step.delay_ms == 0 {
                    advance_on = Some(sound_id);
                } else {
                    let scaled = scaled_duration_ms(step.duration_ms, step.speed) as i64;
                    let wait = (scaled + step.delay_ms).max(0) as u64;
                    timer
                        .as_mut()
                        .reset(Instant::now() + Duration::from_millis(wait));
                    timer_armed = true;
                    cut_on_fire =
                        (step.delay_ms < 0 && step.clip_on_overlap).then_some(sound_id);
                }
            }

            emit(&transitions, chain_id, &sounding, false, None);
            continue;
        }

        if next >= steps.len() && sounding.is_empty() {
            emit(&transitions, chain_id, &sounding, true, None);
            return;
        }

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    // Controller gone without a stop request: wind down
                    // as a chain-local stop.
                    for (sound_id, _) in sounding.drain() {
                        volume.unregister_sound(sound_id);
                        sink.stop(sound_id).await;
                    }
                    emit(&transitions, chain_id, &sounding, true, Some(StopKind::Local));
                    return;
                }
                // Handled at the loop head.
            }
            Some((sound_id, _cause)) = ended.next(), if !ended.is_empty() => {
                volume.unregister_sound(sound_id);
                let was_sounding = sounding.remove(&sound_id).is_some();
                if advance_on == Some(sound_id) {
                    advance_on = None;
                    // The upcoming start reports the combined change.
                    start_next = true;
                } else if was_sounding && !(next >= steps.len() && sounding.is_empty()) {
                    emit(&transitions, chain_id, &sounding, false, None);
                }
                // The terminal case falls out at the loop head.
            }
            _ = &mut timer, if timer_armed => {
                timer_armed = false;
                if let Some(cut) = cut_on_fire.take() {
                    // Cut clips leave the sounding set right away; their
                    // completion notification only confirms it.
                    if sounding.remove(&cut).is_some() {
                        volume.unregister_sound(cut);
                        sink.stop(cut).await;
                    }
                }
                start_next = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::testing::MockSink;
    use clipcast_common::events::EventBus;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_volume(sink: Arc<MockSink>) -> Arc<VolumeCoordinator> {
        // DB setup performs real blocking I/O on sqlx's background connection
        // threads. Under `start_paused` the test's auto-advancing clock races
        // ahead to the pool's acquire timeout before those threads report
        // back (PoolTimedOut). Run the whole setup on a dedicated runtime off
        // the paused test runtime so the paused clock is never touched and
        // the timing assertions stay exact.
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
                VolumeCoordinator::load(pool, sink, EventBus::new(16))
                    .await
                    .unwrap()
            })
        })
        .join()
        .unwrap()
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

    fn start(
        chain_id: Uuid,
        steps: Vec<ResolvedStep>,
        sink: Arc<MockSink>,
        volume: Arc<VolumeCoordinator>,
        tx: mpsc::UnboundedSender<ChainTransition>,
    ) -> ChainHandle {
        let (handle, stop_rx) = handle_pair(chain_id);
        spawn(chain_id, steps, sink, volume, tx, stop_rx);
        handle
    }

    async fn collect_until_terminal(
        rx: &mut mpsc::UnboundedReceiver<ChainTransition>,
    ) -> Vec<ChainTransition> {
        let mut out = Vec::new();
        while let Some(t) = rx.recv().await {
            let terminal = t.terminal;
            out.push(t);
            if terminal {
                break;
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_chain_produces_n_plus_one_transitions() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let clips: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let steps: Vec<ResolvedStep> = clips.iter().map(|c| step(*c, 1000)).collect();
        let _handle = start(Uuid::new_v4(), steps, sink.clone(), volume, tx);

        let transitions = collect_until_terminal(&mut rx).await;
        assert_eq!(transitions.len(), 4);

        for (i, t) in transitions.iter().take(3).enumerate() {
            assert!(!t.terminal);
            assert_eq!(t.sounding, vec![clips[i]], "clip {i} plays alone");
        }
        let last = transitions.last().unwrap();
        assert!(last.terminal);
        assert!(last.sounding.is_empty());
        assert_eq!(last.stopped, None);

        // Sequential: one play per clip, in request order
        assert_eq!(sink.played_clips(), clips);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_chain_resolves_directly_to_finished() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = start(Uuid::new_v4(), Vec::new(), sink.clone(), volume, tx);

        let transitions = collect_until_terminal(&mut rx).await;
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].terminal);
        assert!(transitions[0].sounding.is_empty());
        assert!(sink.played_clips().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timer_and_transitions() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut s1 = step(a, 10_000);
        s1.delay_ms = 500; // timer-based advance
        let steps = vec![s1, step(b, 1000)];
        let handle = start(Uuid::new_v4(), steps, sink.clone(), volume, tx);

        // First transition: a sounding
        let first = rx.recv().await.unwrap();
        assert_eq!(first.sounding, vec![a]);

        handle.stop(StopKind::Local);
        let rest = collect_until_terminal(&mut rx).await;
        let last = rest.last().unwrap();
        assert!(last.terminal);
        assert_eq!(last.stopped, Some(StopKind::Local));
        assert!(last.sounding.is_empty());

        // No further transitions, and b never started
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.played_clips(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = start(
            Uuid::new_v4(),
            vec![step(Uuid::new_v4(), 5000)],
            sink.clone(),
            volume,
            tx,
        );
        let _ = rx.recv().await.unwrap();

        handle.stop(StopKind::Local);
        handle.stop(StopKind::Global);

        let transitions = collect_until_terminal(&mut rx).await;
        let terminals: Vec<_> = transitions.iter().filter(|t| t.terminal).collect();
        assert_eq!(terminals.len(), 1);
        // The first stop wins
        assert_eq!(terminals[0].stopped, Some(StopKind::Local));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_delay_overlaps_clips() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut s1 = step(a, 2000);
        s1.delay_ms = -500; // b starts 500ms before a ends
        let steps = vec![s1, step(b, 1000)];
        let _handle = start(Uuid::new_v4(), steps, sink.clone(), volume, tx);

        let transitions = collect_until_terminal(&mut rx).await;
        assert!(
            transitions.iter().any(|t| t.sounding.len() == 2),
            "a and b should overlap"
        );

        let plays = sink.plays.lock().unwrap().clone();
        let gap = plays[1].started_at - plays[0].started_at;
        assert_eq!(gap, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_delay_with_clip_flag_cuts_current() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut s1 = step(a, 2000);
        s1.delay_ms = -500;
        s1.clip_on_overlap = true;
        let steps = vec![s1, step(b, 1000)];
        let _handle = start(Uuid::new_v4(), steps, sink.clone(), volume, tx);

        let transitions = collect_until_terminal(&mut rx).await;
        // a was cut when b started, so the two never sound together
        assert!(transitions.iter().all(|t| t.sounding.len() <= 1));

        let plays = sink.plays.lock().unwrap().clone();
        let stops = sink.stops.lock().unwrap().clone();
        assert!(stops.contains(&plays[0].sound_id), "a was stopped early");

        let gap = plays[1].started_at - plays[0].started_at;
        assert_eq!(gap, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_delay_inserts_gap() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut s1 = step(a, 1000);
        s1.delay_ms = 500;
        let steps = vec![s1, step(b, 1000)];
        let _handle = start(Uuid::new_v4(), steps, sink.clone(), volume, tx);

        let _ = collect_until_terminal(&mut rx).await;
        let plays = sink.plays.lock().unwrap().clone();
        let gap = plays[1].started_at - plays[0].started_at;
        assert_eq!(gap, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_scales_advance_timing() {
        let sink = Arc::new(MockSink::new());
        let volume = test_volume(sink.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut s1 = step(a, 2000);
        s1.speed = 2.0; // plays in 1000ms
        s1.delay_ms = -200;
        let steps = vec![s1, step(b, 500)];
        let _handle = start(Uuid::new_v4(), steps, sink.clone(), volume, tx);

        let _ = collect_until_terminal(&mut rx).await;
        let plays = sink.plays.lock().unwrap().clone();
        let gap = plays[1].started_at - plays[0].started_at;
        assert_eq!(gap, Duration::from_millis(800));
    }
}
