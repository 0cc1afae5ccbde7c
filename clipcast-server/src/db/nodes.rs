//! Node table access
//!
//! Single-node granularity: one row per node, upserted or deleted by id.
//! Directory child order and watermark, clip voice settings, and tags are
//! stored as JSON/text columns so a directory reorder is still a
//! single-row write.

use clipcast_common::api::{VoiceActivation, Watermark};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::library::{ClipData, Node, NodeKind};

/// One row of the nodes table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeRecord {
    pub id: String,
    pub parent: Option<String>,
    pub kind: String,
    pub name: String,
    pub icon: Option<String>,
    pub tags: String,
    pub children: Option<String>,
    pub watermark: Option<String>,
    pub storage_key: Option<String>,
    pub duration_ms: Option<i64>,
    pub valid: Option<bool>,
    pub voice: Option<String>,
}

const KIND_DIRECTORY: &str = "directory";
const KIND_CLIP: &str = "clip";

fn to_json<T: serde::Serialize>(value: &T) -> String {
    // Plain data types; serialization cannot fail in practice
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

impl NodeRecord {
    pub fn from_node(node: &Node) -> Self {
        let (kind, children, watermark, storage_key, duration_ms, valid, voice) = match &node.kind {
            NodeKind::Directory {
                children,
                watermark,
            } => (
                KIND_DIRECTORY,
                Some(to_json(children)),
                Some(watermark.to_string()),
                None,
                None,
                None,
                None,
            ),
            NodeKind::Clip(data) => (
                KIND_CLIP,
                None,
                None,
                Some(data.storage_key.clone()),
                Some(data.duration_ms as i64),
                Some(data.valid),
                data.voice.as_ref().map(to_json),
            ),
        };
        Self {
            id: node.id.to_string(),
            parent: node.parent.map(|p| p.to_string()),
            kind: kind.to_string(),
            name: node.name.clone(),
            icon: node.icon.clone(),
            tags: to_json(&node.tags),
            children,
            watermark,
            storage_key,
            duration_ms,
            valid,
            voice,
        }
    }

    pub fn into_node(self) -> Result<Node> {
        let id = parse_uuid(&self.id)?;
        let parent = self.parent.as_deref().map(parse_uuid).transpose()?;
        let tags: Vec<String> = serde_json::from_str(&self.tags)
            .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))?;

        let kind = match self.kind.as_str() {
            KIND_DIRECTORY => {
                let children: Vec<Uuid> = self
                    .children
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))?
                    .unwrap_or_default();
                let watermark = self
                    .watermark
                    .as_deref()
                    .map(parse_uuid)
                    .transpose()?
                    .map(Watermark::from)
                    .unwrap_or_else(Watermark::fresh);
                NodeKind::Directory {
                    children,
                    watermark,
                }
            }
            KIND_CLIP => {
                let voice: Option<VoiceActivation> = self
                    .voice
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))?;
                NodeKind::Clip(ClipData {
                    storage_key: self.storage_key.unwrap_or_default(),
                    duration_ms: self.duration_ms.unwrap_or(0).max(0) as u64,
                    valid: self.valid.unwrap_or(false),
                    voice,
                })
            }
            other => {
                return Err(Error::Internal(format!("unknown node kind '{other}'")));
            }
        };

        Ok(Node {
            id,
            parent,
            name: self.name,
            icon: self.icon,
            tags,
            kind,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("invalid uuid '{s}': {e}")))
}

/// Load every node row.
pub async fn load_all(pool: &Pool<Sqlite>) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(
        r#"
        SELECT id, parent, kind, name, icon, tags, children, watermark,
               storage_key, duration_ms, valid, voice
        FROM nodes
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Insert or replace one node row.
pub async fn upsert(pool: &Pool<Sqlite>, record: &NodeRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO nodes (id, parent, kind, name, icon, tags, children,
                           watermark, storage_key, duration_ms, valid, voice)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            parent = excluded.parent,
            kind = excluded.kind,
            name = excluded.name,
            icon = excluded.icon,
            tags = excluded.tags,
            children = excluded.children,
            watermark = excluded.watermark,
            storage_key = excluded.storage_key,
            duration_ms = excluded.duration_ms,
            valid = excluded.valid,
            voice = excluded.voice,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&record.id)
    .bind(&record.parent)
    .bind(&record.kind)
    .bind(&record.name)
    .bind(&record.icon)
    .bind(&record.tags)
    .bind(&record.children)
    .bind(&record.watermark)
    .bind(&record.storage_key)
    .bind(record.duration_ms)
    .bind(record.valid)
    .bind(&record.voice)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete one node row by id.
pub async fn delete(pool: &Pool<Sqlite>, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM nodes WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
