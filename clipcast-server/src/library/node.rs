//! Node data model
//!
//! A node is either a directory (owning an ordered child list and a change
//! watermark) or a clip (referencing stored audio plus metadata and
//! optional voice activation). Shared fields live on the node itself;
//! the variant payload carries the rest.

use clipcast_common::api::{FlatNode, NodeKindTag, VoiceActivation, Watermark};
use uuid::Uuid;

/// Clip payload: stored audio reference plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipData {
    /// File name under the media directory.
    pub storage_key: String,
    /// Clip length in milliseconds (0 when probing failed).
    pub duration_ms: u64,
    /// Whether the audio decoded cleanly at upload.
    pub valid: bool,
    /// Optional voice activation settings.
    pub voice: Option<VoiceActivation>,
}

/// Variant payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Directory {
        /// Owned, ordered child node ids.
        children: Vec<Uuid>,
        /// Replaced with a fresh token whenever anything in this subtree
        /// changes.
        watermark: Watermark,
    },
    Clip(ClipData),
}

/// One node of the shared tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique, immutable id.
    pub id: Uuid,
    /// Parent directory id; `None` only for the root.
    pub parent: Option<Uuid>,
    pub name: String,
    pub icon: Option<String>,
    pub tags: Vec<String>,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_directory(parent: Option<Uuid>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent,
            name: name.into(),
            icon: None,
            tags: Vec::new(),
            kind: NodeKind::Directory {
                children: Vec::new(),
                watermark: Watermark::fresh(),
            },
        }
    }

    pub fn new_clip(parent: Uuid, name: impl Into<String>, clip: ClipData) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: Some(parent),
            name: name.into(),
            icon: None,
            tags: Vec::new(),
            kind: NodeKind::Clip(clip),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn clip(&self) -> Option<&ClipData> {
        match &self.kind {
            NodeKind::Clip(data) => Some(data),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&[Uuid]> {
        match &self.kind {
            NodeKind::Directory { children, .. } => Some(children),
            NodeKind::Clip(_) => None,
        }
    }

    pub fn watermark(&self) -> Option<Watermark> {
        match &self.kind {
            NodeKind::Directory { watermark, .. } => Some(*watermark),
            NodeKind::Clip(_) => None,
        }
    }

    /// Flattened wire view, parent reference included.
    pub fn flatten(&self) -> FlatNode {
        let (kind, duration_ms, valid, voice, watermark) = match &self.kind {
            NodeKind::Directory { watermark, .. } => {
                (NodeKindTag::Directory, None, None, None, Some(*watermark))
            }
            NodeKind::Clip(data) => (
                NodeKindTag::Clip,
                Some(data.duration_ms),
                Some(data.valid),
                data.voice.clone(),
                None,
            ),
        };
        FlatNode {
            id: self.id,
            parent: self.parent,
            kind,
            name: self.name.clone(),
            icon: self.icon.clone(),
            tags: self.tags.clone(),
            duration_ms,
            valid,
            voice,
            watermark,
        }
    }
}
