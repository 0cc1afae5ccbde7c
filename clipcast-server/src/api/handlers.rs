//! HTTP request handlers
//!
//! Maps orchestrator outcomes onto the command envelope and HTTP status
//! codes. The envelope's numeric status is transport-agnostic; HTTP
//! codes are a derived convenience.

use crate::api::server::AppContext;
use crate::error::Error;
use crate::library::{EditFields, Mutation};
use crate::orchestrator::UploadRequest;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use clipcast_common::api::{
    status, CommandResponse, NowPlayingEntry, PlayRequest, TreeNode, VoiceActivation,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    node: Option<Uuid>,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    success: bool,
    status: u16,
    chain_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    volume: u8, // 0-100 user-facing scale
}

#[derive(Debug, Serialize)]
pub struct VolumeResponse {
    success: bool,
    status: u16,
    level: u8,
    ceiling: u8,
    effective: u8,
}

impl VolumeResponse {
    fn from_view(view: crate::playback::VolumeView) -> Self {
        Self {
            success: true,
            status: status::OK,
            level: view.level,
            ceiling: view.ceiling,
            effective: view.effective,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NowPlayingResponse {
    entries: Vec<NowPlayingEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MakeDirectoryRequest {
    name: String,
    icon: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    parent: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    name: Option<String>,
    icon: Option<String>,
    tags: Option<Vec<String>>,
    voice: Option<VoiceActivation>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// Target directory; root when absent.
    target: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadMeta {
    name: Option<String>,
    icon: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    voice: Option<VoiceActivation>,
    parent: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechTestMeta {
    #[serde(default)]
    candidates: Vec<Uuid>,
    #[serde(default)]
    hints: Vec<String>,
}

type CommandResult = (StatusCode, Json<CommandResponse>);

fn http_code(status_code: u16) -> StatusCode {
    match status_code {
        status::OK | status::NO_CHANGE => StatusCode::OK,
        status::INVALID => StatusCode::BAD_REQUEST,
        status::NOT_FOUND => StatusCode::NOT_FOUND,
        status::ROOT_PROTECTED => StatusCode::FORBIDDEN,
        status::IO => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: Error) -> CommandResult {
    let status_code = err.status();
    if status_code == status::INTERNAL {
        error!("request failed: {err}");
    } else {
        info!("request rejected: {err}");
    }
    (
        http_code(status_code),
        Json(CommandResponse::error(status_code, err.to_string())),
    )
}

fn mutation_response(mutation: &Mutation) -> CommandResult {
    let response = if mutation.changed {
        CommandResponse::ok_node(mutation.node.flatten(), mutation.previous_watermark)
    } else {
        CommandResponse::no_change(mutation.node.flatten())
    };
    (StatusCode::OK, Json(response))
}

// ============================================================================
// Health
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "clipcast".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Tree
// ============================================================================

/// GET /tree - Fetch the node tree (or a subtree)
pub async fn get_tree(
    State(ctx): State<AppContext>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<TreeNode>, CommandResult> {
    ctx.orchestrator
        .tree(query.node, query.recursive)
        .await
        .map(Json)
        .map_err(failure)
}

/// POST /directories - Create a directory
pub async fn make_directory(
    State(ctx): State<AppContext>,
    Json(req): Json<MakeDirectoryRequest>,
) -> CommandResult {
    match ctx
        .orchestrator
        .make_directory(req.name, req.icon, req.tags, req.parent)
        .await
    {
        Ok(mutation) => mutation_response(&mutation),
        Err(e) => failure(e),
    }
}

/// POST /nodes/:id/edit - Update node fields
pub async fn edit_node(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditRequest>,
) -> CommandResult {
    let fields = EditFields {
        name: req.name,
        icon: req.icon,
        tags: req.tags,
        voice: req.voice,
    };
    match ctx.orchestrator.edit(id, fields).await {
        Ok(mutation) => mutation_response(&mutation),
        Err(e) => failure(e),
    }
}

/// POST /nodes/:id/move - Re-parent a node
pub async fn move_node(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveRequest>,
) -> CommandResult {
    match ctx.orchestrator.move_node(id, req.target).await {
        Ok(mutation) => mutation_response(&mutation),
        Err(e) => failure(e),
    }
}

/// DELETE /nodes/:id - Delete a node (recursive for directories)
pub async fn delete_node(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> CommandResult {
    match ctx.orchestrator.delete(id).await {
        Ok(mutation) => mutation_response(&mutation),
        Err(e) => failure(e),
    }
}

/// POST /upload - Upload a clip (multipart: `metadata` JSON + `file`)
pub async fn upload(State(ctx): State<AppContext>, mut multipart: Multipart) -> CommandResult {
    let mut meta = UploadMeta::default();
    let mut file_name: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return failure(Error::Invalid(format!("malformed multipart body: {e}")));
            }
        };
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("metadata") => {
                let raw = match field.text().await {
                    Ok(raw) => raw,
                    Err(e) => return failure(Error::Invalid(format!("unreadable metadata: {e}"))),
                };
                meta = match serde_json::from_str(&raw) {
                    Ok(meta) => meta,
                    Err(e) => return failure(Error::Invalid(format!("invalid metadata: {e}"))),
                };
            }
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                bytes = match field.bytes().await {
                    Ok(data) => Some(data.to_vec()),
                    Err(e) => return failure(Error::Invalid(format!("unreadable file: {e}"))),
                };
            }
            _ => {}
        }
    }

    let Some(bytes) = bytes else {
        return failure(Error::Invalid("missing file part".into()));
    };
    let Some(file_name) = file_name else {
        return failure(Error::Invalid("file part has no file name".into()));
    };

    let request = UploadRequest {
        file_name,
        name: meta.name,
        icon: meta.icon,
        tags: meta.tags,
        voice: meta.voice,
        parent: meta.parent,
    };
    match ctx.orchestrator.upload(request, bytes).await {
        Ok(mutation) => mutation_response(&mutation),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Playback
// ============================================================================

/// POST /play - Start a playback chain
pub async fn play(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayRequest>,
) -> Result<Json<PlayResponse>, CommandResult> {
    match ctx.orchestrator.play(req).await {
        Ok(chain_id) => {
            info!("started playback chain {chain_id}");
            Ok(Json(PlayResponse {
                success: true,
                status: status::OK,
                chain_id,
            }))
        }
        Err(e) => Err(failure(e)),
    }
}

/// POST /stop - Global stop; always succeeds
pub async fn stop(State(ctx): State<AppContext>) -> Json<CommandResponse> {
    ctx.orchestrator.stop_all();
    Json(CommandResponse::ok())
}

/// GET /playing - Current aggregated now-playing view
pub async fn get_now_playing(State(ctx): State<AppContext>) -> Json<NowPlayingResponse> {
    Json(NowPlayingResponse {
        entries: ctx.orchestrator.now_playing(),
    })
}

// ============================================================================
// Volume
// ============================================================================

/// GET /volume - Current volume scalars
pub async fn get_volume(State(ctx): State<AppContext>) -> Json<VolumeResponse> {
    Json(VolumeResponse::from_view(ctx.orchestrator.volume()))
}

/// POST /volume - Set volume level
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>, CommandResult> {
    match ctx.orchestrator.set_volume(req.volume).await {
        Ok(view) => Ok(Json(VolumeResponse::from_view(view))),
        Err(e) => Err(failure(e)),
    }
}

/// GET /volume/ceiling - Current ceiling
pub async fn get_volume_ceiling(State(ctx): State<AppContext>) -> Json<VolumeResponse> {
    get_volume(State(ctx)).await
}

/// POST /volume/ceiling - Set the system-wide cap
pub async fn set_volume_ceiling(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>, CommandResult> {
    match ctx.orchestrator.set_volume_ceiling(req.volume).await {
        Ok(view) => Ok(Json(VolumeResponse::from_view(view))),
        Err(e) => Err(failure(e)),
    }
}

// ============================================================================
// Speech
// ============================================================================

/// POST /speech/test - Run audio through recognition and trigger matching
///
/// Multipart: `request` JSON (candidate clip ids + hint phrases) and
/// `audio` bytes. Responds with an SSE stream of transcript/match/end
/// events.
pub async fn speech_test(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<impl axum::response::IntoResponse, CommandResult> {
    let mut meta = SpeechTestMeta::default();
    let mut audio: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(failure(Error::Invalid(format!(
                    "malformed multipart body: {e}"
                ))));
            }
        };
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("request") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| failure(Error::Invalid(format!("unreadable request: {e}"))))?;
                meta = serde_json::from_str(&raw)
                    .map_err(|e| failure(Error::Invalid(format!("invalid request: {e}"))))?;
            }
            Some("audio") => {
                audio = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| failure(Error::Invalid(format!("unreadable audio: {e}"))))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let Some(audio) = audio else {
        return Err(failure(Error::Invalid("missing audio part".into())));
    };

    let events = ctx
        .orchestrator
        .speech_test(audio, meta.candidates, meta.hints)
        .await
        .map_err(failure)?;

    Ok(super::sse::speech_test_stream(events))
}
