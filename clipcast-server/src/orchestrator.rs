//! Orchestrator facade
//!
//! The single entry point for all client operations. Validates every
//! mutating request before touching any lock, re-resolves every
//! client-supplied node reference through the NodeStore, protects the
//! root, and emits exactly one change event per successful mutation
//! (carrying the flattened affected node and the pre-mutation root
//! watermark).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipcast_common::api::{
    ChangeKind, NowPlayingEntry, PlayRequest, SpeechTestEvent, TreeNode, VoiceActivation,
};
use clipcast_common::events::{ClipcastEvent, EventBus};
use sqlx::{Pool, Sqlite};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::library::{EditFields, Mutation, NewClip, NodeStore};
use crate::media::ClipProbe;
use crate::playback::{PlaybackCoordinator, ResolvedStep, VolumeCoordinator, VolumeView};
use crate::speech::matcher::{Candidate, MatchTarget, SpeechMatcher};
use crate::speech::transcriber::{RecognizerEvent, Transcriber, TranscriberOptions};

/// File extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];

/// Requester identity used for voice-triggered playback.
pub const VOICE_REQUESTER: &str = "voice";

/// Metadata accompanying an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Client-side file name; supplies the extension.
    pub file_name: String,
    /// Display name; defaults to the file stem.
    pub name: Option<String>,
    pub icon: Option<String>,
    pub tags: Vec<String>,
    pub voice: Option<VoiceActivation>,
    /// Target directory; root when `None`.
    pub parent: Option<Uuid>,
}

pub struct Orchestrator {
    store: Arc<NodeStore>,
    playback: Arc<PlaybackCoordinator>,
    volume: Arc<VolumeCoordinator>,
    transcriber: Arc<dyn Transcriber>,
    probe: Arc<dyn ClipProbe>,
    bus: EventBus,
    media_dir: PathBuf,
    db: Pool<Sqlite>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<NodeStore>,
        playback: Arc<PlaybackCoordinator>,
        volume: Arc<VolumeCoordinator>,
        transcriber: Arc<dyn Transcriber>,
        probe: Arc<dyn ClipProbe>,
        bus: EventBus,
        media_dir: PathBuf,
        db: Pool<Sqlite>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            playback,
            volume,
            transcriber,
            probe,
            bus,
            media_dir,
            db,
        })
    }

    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn transcriber(&self) -> Arc<dyn Transcriber> {
        Arc::clone(&self.transcriber)
    }

    // ------------------------------------------------------------------
    // Tree reads
    // ------------------------------------------------------------------

    pub async fn tree(&self, node: Option<Uuid>, recursive: bool) -> Result<TreeNode> {
        self.store.tree(node, recursive).await
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Resolve and start a playback request; returns the chain id.
    pub async fn play(&self, request: PlayRequest) -> Result<Uuid> {
        let requester = request
            .requester
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "anonymous".to_string());

        let mut steps = Vec::with_capacity(request.steps.len());
        for step in &request.steps {
            if step.volume == 0 || step.volume > 100 {
                return Err(Error::Invalid(format!(
                    "step volume {} outside 1-100",
                    step.volume
                )));
            }
            if !(step.speed.is_finite() && step.speed > 0.0) {
                return Err(Error::Invalid(format!("step speed {} invalid", step.speed)));
            }
            // Never trust client-held node data; resolve by id.
            let node = self
                .store
                .resolve(step.clip_id)
                .await
                .ok_or_else(|| Error::NotFound(format!("clip {}", step.clip_id)))?;
            let clip = node
                .clip()
                .ok_or_else(|| Error::Invalid(format!("node {} is not a clip", node.id)))?;
            steps.push(ResolvedStep {
                clip_id: node.id,
                source: self.media_dir.join(&clip.storage_key),
                duration_ms: clip.duration_ms,
                volume: step.volume,
                speed: step.speed,
                delay_ms: step.delay_ms,
                clip_on_overlap: step.clip_on_overlap,
            });
        }

        Ok(self.playback.play(requester, steps))
    }

    /// Single-clip playback with default options (voice triggers).
    pub async fn play_clip(&self, requester: &str, clip_id: Uuid) -> Result<Uuid> {
        let node = self
            .store
            .resolve(clip_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("clip {clip_id}")))?;
        let clip = node
            .clip()
            .ok_or_else(|| Error::Invalid(format!("node {} is not a clip", node.id)))?;
        Ok(self.playback.play(
            requester.to_string(),
            vec![ResolvedStep {
                clip_id: node.id,
                source: self.media_dir.join(&clip.storage_key),
                duration_ms: clip.duration_ms,
                volume: 100,
                speed: 1.0,
                delay_ms: 0,
                clip_on_overlap: false,
            }],
        ))
    }

    /// Global stop. Always succeeds, even with nothing playing.
    pub fn stop_all(&self) {
        self.playback.stop_all();
    }

    pub fn now_playing(&self) -> Vec<NowPlayingEntry> {
        self.playback.now_playing()
    }

    // ------------------------------------------------------------------
    // Volume
    // ------------------------------------------------------------------

    pub fn volume(&self) -> VolumeView {
        self.volume.view()
    }

    pub async fn set_volume(&self, level: u8) -> Result<VolumeView> {
        if level > 100 {
            return Err(Error::Invalid(format!("volume {level} outside 0-100")));
        }
        self.volume.set_level(level).await
    }

    pub async fn set_volume_ceiling(&self, ceiling: u8) -> Result<VolumeView> {
        if ceiling > 100 {
            return Err(Error::Invalid(format!(
                "volume ceiling {ceiling} outside 0-100"
            )));
        }
        self.volume.set_ceiling(ceiling).await
    }

    // ------------------------------------------------------------------
    // Tree mutations
    // ------------------------------------------------------------------

    pub async fn make_directory(
        &self,
        name: String,
        icon: Option<String>,
        tags: Vec<String>,
        parent: Option<Uuid>,
    ) -> Result<Mutation> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Invalid("directory name must not be empty".into()));
        }
        let mutation = self.store.create_directory(parent, name, icon, tags).await?;
        self.emit_change(ChangeKind::Added, &mutation);
        Ok(mutation)
    }

    /// Upload a clip: bytes to a temp file and metadata probing happen
    /// outside any lock; only the final publish (move into place, insert,
    /// watermark, event) runs under the tree section. Any failure removes
    /// the temp artifact and leaves the tree untouched.
    pub async fn upload(&self, upload: UploadRequest, bytes: Vec<u8>) -> Result<Mutation> {
        let UploadRequest {
            file_name,
            name,
            icon,
            tags,
            voice,
            parent,
        } = upload;

        let extension = Path::new(&file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| Error::Invalid("file name has no extension".into()))?;
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(Error::Invalid(format!(
                "extension '{extension}' is not allowed"
            )));
        }

        let stem = Path::new(&file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(stem)
            .trim()
            .to_string();
        if name.is_empty() {
            return Err(Error::Invalid("clip name must not be empty".into()));
        }

        // Fail fast on a bad target before writing anything
        if let Some(parent) = parent {
            let node = self
                .store
                .resolve(parent)
                .await
                .ok_or_else(|| Error::NotFound(format!("directory {parent}")))?;
            if !node.is_directory() {
                return Err(Error::Invalid(format!("node {parent} is not a directory")));
            }
        }

        let file_id = Uuid::new_v4();
        let storage_key = format!("{file_id}.{extension}");
        let incoming = self.media_dir.join(".incoming");
        tokio::fs::create_dir_all(&incoming).await?;
        let temp_path = incoming.join(format!("{storage_key}.part"));

        tokio::fs::write(&temp_path, &bytes).await?;

        let published = async {
            let metadata = self.probe.probe(&temp_path).await?;
            let final_path = self.media_dir.join(&storage_key);
            self.store
                .publish_clip(
                    parent,
                    NewClip {
                        name,
                        icon,
                        tags,
                        storage_key,
                        duration_ms: metadata.duration_ms,
                        valid: metadata.valid,
                        voice,
                    },
                    &temp_path,
                    &final_path,
                )
                .await
        }
        .await;

        match published {
            Ok(mutation) => {
                info!(
                    "uploaded clip '{}' ({} bytes) as {}",
                    mutation.node.name,
                    bytes.len(),
                    mutation.node.id
                );
                self.emit_change(ChangeKind::Added, &mutation);
                Ok(mutation)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                    warn!("could not remove upload artifact: {cleanup}");
                }
                Err(e)
            }
        }
    }

    pub async fn edit(&self, id: Uuid, fields: EditFields) -> Result<Mutation> {
        if let Some(name) = &fields.name {
            if name.trim().is_empty() {
                return Err(Error::Invalid("node name must not be empty".into()));
            }
        }
        let mutation = self.store.edit(id, fields).await?;
        if mutation.changed {
            self.emit_change(ChangeKind::Modified, &mutation);
        }
        Ok(mutation)
    }

    pub async fn move_node(&self, id: Uuid, target: Option<Uuid>) -> Result<Mutation> {
        let mutation = self.store.move_node(id, target).await?;
        if mutation.changed {
            self.emit_change(ChangeKind::Moved, &mutation);
        }
        Ok(mutation)
    }

    pub async fn delete(&self, id: Uuid) -> Result<Mutation> {
        let mutation = self.store.delete(id).await?;
        self.emit_change(ChangeKind::Deleted, &mutation);
        // Media cleanup is best-effort and stays outside the tree section
        for storage_key in &mutation.removed_clips {
            if let Err(e) = tokio::fs::remove_file(self.media_dir.join(storage_key)).await {
                warn!("could not remove media file {storage_key}: {e}");
            }
        }
        Ok(mutation)
    }

    fn emit_change(&self, kind: ChangeKind, mutation: &Mutation) {
        self.bus.emit_lossy(ClipcastEvent::TreeChanged {
            kind,
            node: mutation.node.flatten(),
            previous_watermark: mutation.previous_watermark,
            timestamp: chrono::Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Speech
    // ------------------------------------------------------------------

    /// Run submitted audio through the transcription collaborator and the
    /// trigger matcher; yields transcript, match, and end events.
    pub async fn speech_test(
        &self,
        audio: Vec<u8>,
        candidate_ids: Vec<Uuid>,
        hints: Vec<String>,
    ) -> Result<mpsc::Receiver<SpeechTestEvent>> {
        let stop_phrases = db::settings::get_stop_phrases(&self.db).await?;
        let mut candidates = vec![Candidate {
            target: MatchTarget::Stop,
            triggers: stop_phrases.clone(),
        }];

        let mut hint_phrases = hints;
        hint_phrases.extend(stop_phrases);
        for id in candidate_ids {
            let node = self
                .store
                .resolve(id)
                .await
                .ok_or_else(|| Error::NotFound(format!("clip {id}")))?;
            let Some(voice) = node.clip().and_then(|c| c.voice.clone()) else {
                // Nothing to match against; skip silently
                continue;
            };
            hint_phrases.extend(voice.triggers.iter().cloned());
            hint_phrases.extend(voice.hints.iter().cloned());
            candidates.push(Candidate {
                target: MatchTarget::Clip(node.id),
                triggers: voice.triggers,
            });
        }

        let mut transcripts = self
            .transcriber
            .transcribe(
                audio,
                TranscriberOptions {
                    languages: Vec::new(),
                    hint_phrases,
                },
            )
            .await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut matcher = SpeechMatcher::new();
            while let Some(event) = transcripts.recv().await {
                match event {
                    RecognizerEvent::Transcript(transcript) => {
                        if tx
                            .send(SpeechTestEvent::Transcript {
                                grouping: transcript.grouping.clone(),
                                text: transcript.text.clone(),
                                is_final: transcript.is_final,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        if let Some(hit) = matcher.push(&transcript, &candidates) {
                            let clip_id = match hit.target {
                                MatchTarget::Clip(id) => Some(id),
                                MatchTarget::Stop => None,
                            };
                            if tx
                                .send(SpeechTestEvent::Match {
                                    clip_id,
                                    spoken: hit.spoken,
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    RecognizerEvent::Ended => break,
                }
            }
            let _ = tx.send(SpeechTestEvent::End).await;
        });
        Ok(rx)
    }

    /// Candidate set for the live voice listener: the reserved stop
    /// target first (so "stop" beats any clip trigger embedding it), then
    /// voice-activated clips in depth-first tree order.
    pub(crate) async fn voice_candidates(
        &self,
    ) -> Result<(Vec<Candidate>, HashMap<Uuid, f32>, TranscriberOptions)> {
        let stop_phrases = db::settings::get_stop_phrases(&self.db).await?;
        let mut candidates = vec![Candidate {
            target: MatchTarget::Stop,
            triggers: stop_phrases.clone(),
        }];
        let mut probabilities = HashMap::new();
        let mut hint_phrases = stop_phrases;

        for node in self.store.voice_clips().await {
            let Some(voice) = node.clip().and_then(|c| c.voice.clone()) else {
                continue;
            };
            hint_phrases.extend(voice.triggers.iter().cloned());
            hint_phrases.extend(voice.hints.iter().cloned());
            probabilities.insert(node.id, voice.probability.clamp(0.0, 1.0));
            candidates.push(Candidate {
                target: MatchTarget::Clip(node.id),
                triggers: voice.triggers,
            });
        }

        Ok((
            candidates,
            probabilities,
            TranscriberOptions {
                languages: Vec::new(),
                hint_phrases,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::probe::testing::StubProbe;
    use crate::playback::sink::testing::MockSink;
    use crate::speech::matcher::TranscriptEvent;
    use crate::speech::transcriber::testing::ScriptedTranscriber;
    use clipcast_common::api::PlayStep;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_with_transcriber(
        transcriber: Arc<dyn Transcriber>,
    ) -> (Arc<Orchestrator>, Arc<MockSink>, tempfile::TempDir) {
        let media = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init::initialize_database(&pool).await.unwrap();

        let store = NodeStore::open(pool.clone()).await.unwrap();
        let bus = EventBus::new(64);
        let sink = Arc::new(MockSink::new());
        let volume = VolumeCoordinator::load(pool.clone(), sink.clone(), bus.clone())
            .await
            .unwrap();
        let playback = PlaybackCoordinator::new(sink.clone(), volume.clone(), bus.clone());
        let orchestrator = Orchestrator::new(
            store,
            playback,
            volume,
            transcriber,
            Arc::new(StubProbe::new(1800, true)),
            bus,
            media.path().to_path_buf(),
            pool,
        );
        (orchestrator, sink, media)
    }

    async fn setup() -> (Arc<Orchestrator>, Arc<MockSink>, tempfile::TempDir) {
        setup_with_transcriber(Arc::new(crate::speech::NullTranscriber)).await
    }

    fn upload_request(file_name: &str) -> UploadRequest {
        UploadRequest {
            file_name: file_name.into(),
            name: None,
            icon: None,
            tags: Vec::new(),
            voice: None,
            parent: None,
        }
    }

    #[tokio::test]
    async fn test_upload_publishes_clip_and_emits_added() {
        let (orchestrator, _sink, media) = setup().await;
        let mut events = orchestrator.event_bus().subscribe();
        let before = orchestrator.tree(None, false).await.unwrap();
        let root_wm = before.node.watermark.unwrap();

        let mutation = orchestrator
            .upload(upload_request("horn.mp3"), vec![0u8; 64])
            .await
            .unwrap();

        assert_eq!(mutation.node.name, "horn");
        let clip = mutation.node.clip().unwrap();
        assert_eq!(clip.duration_ms, 1800);
        assert!(clip.valid);
        assert!(media.path().join(&clip.storage_key).exists());

        match events.try_recv().unwrap() {
            ClipcastEvent::TreeChanged {
                kind,
                node,
                previous_watermark,
                ..
            } => {
                assert_eq!(kind, ChangeKind::Added);
                assert_eq!(node.id, mutation.node.id);
                assert_eq!(previous_watermark, root_wm);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_extension_without_artifacts() {
        let (orchestrator, _sink, media) = setup().await;
        let before = orchestrator.tree(None, true).await.unwrap();

        let err = orchestrator
            .upload(upload_request("nasty.exe"), vec![0u8; 64])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        // No temp file, no media file, no tree change
        assert!(!media.path().join(".incoming").exists());
        let after = orchestrator.tree(None, true).await.unwrap();
        assert_eq!(after.node.watermark, before.node.watermark);
        assert!(after.children.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_removes_temp_artifact() {
        let (orchestrator, _sink, media) = setup().await;

        // Target directory vanishes between validation and publish is
        // hard to stage; a missing parent is the simplest failing path.
        let err = orchestrator
            .upload(
                UploadRequest {
                    parent: Some(Uuid::new_v4()),
                    ..upload_request("horn.mp3")
                },
                vec![0u8; 64],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let incoming = media.path().join(".incoming");
        if incoming.exists() {
            assert_eq!(std::fs::read_dir(&incoming).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn test_make_directory_validates_name() {
        let (orchestrator, _sink, _media) = setup().await;

        let err = orchestrator
            .make_directory("   ".into(), None, Vec::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn test_root_mutations_rejected() {
        let (orchestrator, _sink, _media) = setup().await;
        let root = orchestrator.tree(None, false).await.unwrap().node.id;

        assert!(matches!(
            orchestrator.delete(root).await.unwrap_err(),
            Error::RootProtected(_)
        ));
        assert!(matches!(
            orchestrator
                .edit(
                    root,
                    EditFields {
                        name: Some("nope".into()),
                        ..Default::default()
                    }
                )
                .await
                .unwrap_err(),
            Error::RootProtected(_)
        ));
    }

    #[tokio::test]
    async fn test_move_to_same_parent_emits_no_event() {
        let (orchestrator, _sink, _media) = setup().await;
        let dir = orchestrator
            .make_directory("stuff".into(), None, Vec::new(), None)
            .await
            .unwrap();

        let mut events = orchestrator.event_bus().subscribe();
        let mutation = orchestrator.move_node(dir.node.id, None).await.unwrap();
        assert!(!mutation.changed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_play_resolves_clips_and_rejects_unknown() {
        let (orchestrator, sink, _media) = setup().await;
        let clip = orchestrator
            .upload(upload_request("horn.mp3"), vec![0u8; 64])
            .await
            .unwrap();

        let err = orchestrator
            .play(PlayRequest {
                requester: None,
                steps: vec![PlayStep {
                    clip_id: Uuid::new_v4(),
                    volume: 100,
                    speed: 1.0,
                    delay_ms: 0,
                    clip_on_overlap: false,
                }],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(sink.played_clips().is_empty());

        orchestrator
            .play(PlayRequest {
                requester: Some("tester".into()),
                steps: vec![PlayStep {
                    clip_id: clip.node.id,
                    volume: 80,
                    speed: 1.0,
                    delay_ms: 0,
                    clip_on_overlap: false,
                }],
            })
            .await
            .unwrap();

        // Give the chain task a moment to start the sound
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sink.played_clips(), vec![clip.node.id]);
    }

    #[tokio::test]
    async fn test_delete_removes_media_file() {
        let (orchestrator, _sink, media) = setup().await;
        let clip = orchestrator
            .upload(upload_request("horn.mp3"), vec![0u8; 64])
            .await
            .unwrap();
        let storage_key = clip.node.clip().unwrap().storage_key.clone();
        assert!(media.path().join(&storage_key).exists());

        orchestrator.delete(clip.node.id).await.unwrap();
        assert!(!media.path().join(&storage_key).exists());
    }

    #[tokio::test]
    async fn test_speech_test_streams_transcripts_and_matches() {
        let script = vec![
            TranscriptEvent {
                grouping: "g1".into(),
                is_final: false,
                word_mode: false,
                text: "turn the".into(),
                language: Some("en".into()),
                at: tokio::time::Instant::now(),
            },
            TranscriptEvent {
                grouping: "g1".into(),
                is_final: true,
                word_mode: false,
                text: "turn the music up".into(),
                language: Some("en".into()),
                at: tokio::time::Instant::now(),
            },
        ];
        let transcriber = Arc::new(ScriptedTranscriber::new(script));
        let (orchestrator, _sink, _media) = setup_with_transcriber(transcriber).await;

        let clip = orchestrator
            .upload(
                UploadRequest {
                    voice: Some(VoiceActivation {
                        triggers: vec!["music up".into()],
                        hints: vec![],
                        probability: 1.0,
                    }),
                    ..upload_request("music.mp3")
                },
                vec![0u8; 64],
            )
            .await
            .unwrap();

        let mut rx = orchestrator
            .speech_test(Vec::new(), vec![clip.node.id], Vec::new())
            .await
            .unwrap();

        let mut transcripts = 0;
        let mut matches = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                SpeechTestEvent::Transcript { .. } => transcripts += 1,
                SpeechTestEvent::Match { clip_id, spoken } => matches.push((clip_id, spoken)),
                SpeechTestEvent::End => break,
            }
        }
        assert_eq!(transcripts, 2);
        assert_eq!(
            matches,
            vec![(
                Some(clip.node.id),
                vec!["music".to_string(), "up".to_string()]
            )]
        );
    }
}
