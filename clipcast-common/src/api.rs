//! Transport-agnostic API types
//!
//! Shared request/response shapes exchanged between the server and its
//! clients. The HTTP layer maps these onto its own wire format; nothing in
//! here depends on axum.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation status codes carried in every mutating response.
///
/// Distinct from HTTP status codes: the transport layer maps these onto
/// whatever its protocol uses. `NO_CHANGE` is a success, not an error
/// (e.g. moving a node to its current parent).
pub mod status {
    /// Operation applied.
    pub const OK: u16 = 0;
    /// Operation accepted but nothing changed.
    pub const NO_CHANGE: u16 = 1;
    /// Request failed validation (empty name, disallowed extension, ...).
    pub const INVALID: u16 = 10;
    /// A client-supplied node reference did not resolve.
    pub const NOT_FOUND: u16 = 11;
    /// The root node may not be edited, moved, or deleted.
    pub const ROOT_PROTECTED: u16 = 12;
    /// Temp-file write or move-into-place failed; no tree mutation done.
    pub const IO: u16 = 20;
    /// Unexpected failure, logged server-side.
    pub const INTERNAL: u16 = 30;
}

/// Opaque version token carried by every directory.
///
/// Equality/inequality is the only guaranteed comparison; tokens are not
/// ordered. The root directory's watermark changes whenever anything in
/// the tree changes, so clients can poll a single value to detect missed
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(Uuid);

impl Watermark {
    /// Generate a fresh token, distinct from all previously issued ones.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for Watermark {
    fn from(token: Uuid) -> Self {
        Self(token)
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Node kind discriminator in flattened views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindTag {
    Directory,
    Clip,
}

/// Voice activation settings attached to a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceActivation {
    /// Phrases that fire playback when spoken.
    pub triggers: Vec<String>,
    /// Extra phrases handed to the transcription backend as hints.
    #[serde(default)]
    pub hints: Vec<String>,
    /// Probability (0.0-1.0) that a recognized trigger actually fires.
    #[serde(default = "default_probability")]
    pub probability: f32,
}

fn default_probability() -> f32 {
    1.0
}

/// Flattened view of a single node, parent reference included.
///
/// Carried in change events and mutating responses. Clip and directory
/// fields are optional and populated according to `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatNode {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub kind: NodeKindTag,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Clip length in milliseconds (clips only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Whether the stored audio decoded cleanly at upload (clips only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceActivation>,
    /// Change watermark (directories only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<Watermark>,
}

/// Nested tree view returned by `getTree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: FlatNode,
    /// Present for directories when a recursive listing was requested;
    /// `None` for clips and for non-recursive directory listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// One step of a playback request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayStep {
    pub clip_id: Uuid,
    /// Step volume, 1-100.
    #[serde(default = "default_volume")]
    pub volume: u8,
    /// Playback speed factor, > 0.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Offset applied between this clip and the next. Negative values
    /// start the next clip before this one ends (overlap); positive
    /// values insert a gap after natural completion.
    #[serde(default)]
    pub delay_ms: i64,
    /// When overlapping (negative delay), cut this clip short instead of
    /// letting the two sound together.
    #[serde(default)]
    pub clip_on_overlap: bool,
}

fn default_volume() -> u8 {
    100
}

fn default_speed() -> f32 {
    1.0
}

/// A playback request: who asked, and the ordered clip sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    /// Requester identity shown in the aggregated now-playing view.
    #[serde(default)]
    pub requester: Option<String>,
    pub steps: Vec<PlayStep>,
}

/// One (requester, clip) pair of the aggregated now-playing view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlayingEntry {
    pub requester: String,
    pub clip_id: Uuid,
}

/// What a tree mutation did to the affected node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Moved,
}

/// Envelope returned by every mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Flattened affected node (file operations).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<FlatNode>,
    /// Root watermark from before the mutation; clients compare it with
    /// the last one they saw to detect missed events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_watermark: Option<Watermark>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            status: status::OK,
            message: None,
            node: None,
            previous_watermark: None,
        }
    }

    pub fn ok_node(node: FlatNode, previous_watermark: Watermark) -> Self {
        Self {
            success: true,
            status: status::OK,
            message: None,
            node: Some(node),
            previous_watermark: Some(previous_watermark),
        }
    }

    pub fn no_change(node: FlatNode) -> Self {
        Self {
            success: true,
            status: status::NO_CHANGE,
            message: None,
            node: Some(node),
            previous_watermark: None,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            message: Some(message.into()),
            node: None,
            previous_watermark: None,
        }
    }
}

/// Events streamed back by the `speechTest` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SpeechTestEvent {
    /// Raw transcription progress.
    Transcript {
        grouping: String,
        text: String,
        is_final: bool,
    },
    /// A candidate's trigger phrase matched.
    Match {
        /// Matched clip, or `None` for the reserved stop target.
        clip_id: Option<Uuid>,
        /// Original spoken words of the matched span.
        spoken: Vec<String>,
    },
    /// Transcription finished; no further events follow.
    End,
}
