//! NodeStore: the single source of truth for the clip tree
//!
//! An arena of nodes keyed by id behind one `tokio::sync::RwLock` (the
//! tree section). Arena helpers take `&mut NodeArena` obtained from the
//! write guard, so no helper ever re-acquires the lock. Every mutation
//! applies the in-memory change and enqueues its persistence ops inside
//! the same write section; a dedicated writer task drains the queue in
//! FIFO order, so persistence is fire-and-forget for callers but never
//! reordered relative to the cache.

use std::collections::HashMap;
use std::path::Path;

use clipcast_common::api::{TreeNode, VoiceActivation, Watermark};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::library::node::{ClipData, Node, NodeKind};

/// One persistence unit, snapshotted at enqueue time.
#[derive(Debug)]
pub(crate) enum PersistOp {
    Upsert(Node),
    Delete(Uuid),
}

/// Outcome of a tree mutation.
#[derive(Debug)]
pub struct Mutation {
    /// The affected node, post-mutation (pre-delete for deletes).
    pub node: Node,
    /// Root watermark captured before the mutation.
    pub previous_watermark: Watermark,
    /// False when the operation was accepted but nothing changed.
    pub changed: bool,
    /// Storage keys of clips removed by a delete, for media cleanup.
    pub removed_clips: Vec<String>,
}

/// Fields of a new clip to publish into the tree.
#[derive(Debug, Clone)]
pub struct NewClip {
    pub name: String,
    pub icon: Option<String>,
    pub tags: Vec<String>,
    pub storage_key: String,
    pub duration_ms: u64,
    pub valid: bool,
    pub voice: Option<VoiceActivation>,
}

/// Editable fields; `Some` replaces, `None` leaves untouched.
#[derive(Debug, Clone, Default)]
pub struct EditFields {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Clips only. Voice activation with no triggers disables it.
    pub voice: Option<VoiceActivation>,
}

/// The in-memory tree, only ever touched through a lock guard.
pub(crate) struct NodeArena {
    nodes: HashMap<Uuid, Node>,
    root: Uuid,
}

impl NodeArena {
    fn get(&self, id: Uuid) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))
    }

    fn root_watermark(&self) -> Watermark {
        // The root is always a directory; a missing watermark would mean
        // arena corruption.
        self.nodes
            .get(&self.root)
            .and_then(Node::watermark)
            .unwrap_or_else(Watermark::fresh)
    }

    /// Resolve an optional directory reference, defaulting to the root.
    fn resolve_directory(&self, id: Option<Uuid>) -> Result<Uuid> {
        match id {
            None => Ok(self.root),
            Some(id) => {
                let node = self.get(id)?;
                if node.is_directory() {
                    Ok(id)
                } else {
                    Err(Error::Invalid(format!("node {id} is not a directory")))
                }
            }
        }
    }

    fn attach(&mut self, parent: Uuid, child: Uuid) -> Result<()> {
        match self.nodes.get_mut(&parent).map(|n| &mut n.kind) {
            Some(NodeKind::Directory { children, .. }) => {
                if !children.contains(&child) {
                    children.push(child);
                }
                Ok(())
            }
            _ => Err(Error::Internal(format!("attach target {parent} is not a directory"))),
        }
    }

    fn detach(&mut self, parent: Uuid, child: Uuid) -> Result<()> {
        match self.nodes.get_mut(&parent).map(|n| &mut n.kind) {
            Some(NodeKind::Directory { children, .. }) => {
                children.retain(|c| *c != child);
                Ok(())
            }
            _ => Err(Error::Internal(format!("detach target {parent} is not a directory"))),
        }
    }

    /// Directory whose watermark a mutation of `id` anchors at: the node
    /// itself for directories, its parent for clips.
    fn watermark_anchor(&self, id: Uuid) -> Result<Uuid> {
        let node = self.get(id)?;
        if node.is_directory() {
            Ok(id)
        } else {
            node.parent
                .ok_or_else(|| Error::Internal(format!("clip {id} has no parent")))
        }
    }

    /// Set `token` on `start` and every ancestor directory up to the root,
    /// snapshotting each touched directory for persistence. Stops early
    /// when a directory already carries the token (shared ancestor of a
    /// second propagation within the same mutation).
    fn propagate_token(&mut self, start: Uuid, token: Watermark, ops: &mut Vec<PersistOp>) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let Some(node) = self.nodes.get_mut(&id) else {
                warn!("watermark walk hit missing node {id}");
                return;
            };
            let next = node.parent;
            if let NodeKind::Directory { watermark, .. } = &mut node.kind {
                if *watermark == token {
                    return;
                }
                *watermark = token;
                ops.push(PersistOp::Upsert(node.clone()));
            }
            cur = next;
        }
    }

    fn propagate(&mut self, start: Uuid, ops: &mut Vec<PersistOp>) -> Watermark {
        let token = Watermark::fresh();
        self.propagate_token(start, token, ops);
        token
    }

    /// True when `candidate` is `ancestor` or lies underneath it.
    fn is_in_subtree(&self, candidate: Uuid, ancestor: Uuid) -> bool {
        let mut cur = Some(candidate);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Post-order subtree ids (children before their directory).
    fn subtree_post_order(&self, id: Uuid, out: &mut Vec<Uuid>) {
        if let Some(children) = self.nodes.get(&id).and_then(Node::children) {
            for child in children.to_vec() {
                self.subtree_post_order(child, out);
            }
        }
        out.push(id);
    }

    fn tree_view(&self, id: Uuid, recursive: bool, depth: usize) -> Result<TreeNode> {
        let node = self.get(id)?;
        let children = match node.children() {
            // Immediate children are always listed; grandchildren only on
            // recursive requests.
            Some(child_ids) if recursive || depth == 0 => {
                let mut views = Vec::with_capacity(child_ids.len());
                for child in child_ids {
                    views.push(self.tree_view(*child, recursive, depth + 1)?);
                }
                Some(views)
            }
            // Unexpanded directory: children omitted rather than shown
            // as an empty list.
            Some(_) => None,
            None => None,
        };
        Ok(TreeNode {
            node: node.flatten(),
            children,
        })
    }
}

/// Thread-safe store over the node arena.
pub struct NodeStore {
    arena: RwLock<NodeArena>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
}

impl NodeStore {
    /// Load the tree from the database, repair inconsistencies, lazily
    /// create the root when empty, and start the persistence writer.
    pub async fn open(pool: Pool<Sqlite>) -> Result<Arc<Self>> {
        let records = db::nodes::load_all(&pool).await?;
        let mut nodes: HashMap<Uuid, Node> = HashMap::new();
        for record in records {
            match record.into_node() {
                Ok(node) => {
                    nodes.insert(node.id, node);
                }
                Err(e) => warn!("skipping unreadable node row: {e}"),
            }
        }

        let root = match nodes.values().find(|n| n.is_root() && n.is_directory()) {
            Some(node) => node.id,
            None => {
                let node = Node::new_directory(None, "root");
                db::nodes::upsert(&pool, &db::nodes::NodeRecord::from_node(&node)).await?;
                info!("created root directory {}", node.id);
                let id = node.id;
                nodes.insert(id, node);
                id
            }
        };

        let mut arena = NodeArena { nodes, root };
        Self::repair(&mut arena, &pool).await?;

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_worker(pool, persist_rx));

        Ok(Arc::new(Self {
            arena: RwLock::new(arena),
            persist_tx,
        }))
    }

    /// Restore the parent/child invariants after a crash: drop dangling
    /// child entries, re-attach orphans to the root, re-list nodes their
    /// parent forgot.
    async fn repair(arena: &mut NodeArena, pool: &Pool<Sqlite>) -> Result<()> {
        let root = arena.root;
        let mut fixed: Vec<Uuid> = Vec::new();

        let ids: Vec<Uuid> = arena.nodes.keys().copied().collect();
        for id in &ids {
            if *id == root {
                continue;
            }
            let parent = arena.nodes[id].parent;
            let parent_ok = parent
                .and_then(|p| arena.nodes.get(&p))
                .map(|p| p.is_directory())
                .unwrap_or(false);
            if !parent_ok {
                warn!("node {id} has a dangling parent, re-attaching to root");
                if let Some(node) = arena.nodes.get_mut(id) {
                    node.parent = Some(root);
                }
                fixed.push(*id);
            }
        }

        for id in &ids {
            let Some(children) = arena.nodes[id].children().map(<[Uuid]>::to_vec) else {
                continue;
            };
            let valid: Vec<Uuid> = children
                .iter()
                .copied()
                .filter(|c| {
                    arena
                        .nodes
                        .get(c)
                        .map(|n| n.parent == Some(*id))
                        .unwrap_or(false)
                })
                .collect();
            if valid.len() != children.len() {
                warn!("directory {id} listed missing or re-parented children");
                if let Some(NodeKind::Directory { children, .. }) =
                    arena.nodes.get_mut(id).map(|n| &mut n.kind)
                {
                    *children = valid;
                }
                fixed.push(*id);
            }
        }

        for id in &ids {
            let (Some(parent), false) = (arena.nodes[id].parent, *id == root) else {
                continue;
            };
            let listed = arena
                .nodes
                .get(&parent)
                .and_then(Node::children)
                .map(|c| c.contains(id))
                .unwrap_or(false);
            if !listed {
                arena.attach(parent, *id)?;
                fixed.push(parent);
            }
        }

        for id in fixed {
            if let Some(node) = arena.nodes.get(&id) {
                db::nodes::upsert(pool, &db::nodes::NodeRecord::from_node(node)).await?;
            }
        }
        Ok(())
    }

    fn send_ops(&self, ops: Vec<PersistOp>) {
        for op in ops {
            // A dropped receiver only happens at shutdown (or in tests
            // that inspect the queue); the in-memory state stays correct.
            let _ = self.persist_tx.send(op);
        }
    }

    /// Resolve a node by id, returning a detached copy.
    ///
    /// Callers never receive aliases into the live arena; anyone holding
    /// a node across time must re-resolve before acting on it.
    pub async fn resolve(&self, id: Uuid) -> Option<Node> {
        self.arena.read().await.nodes.get(&id).cloned()
    }

    pub async fn root_id(&self) -> Uuid {
        self.arena.read().await.root
    }

    pub async fn root_watermark(&self) -> Watermark {
        self.arena.read().await.root_watermark()
    }

    /// Nested tree view rooted at `node` (root when `None`).
    pub async fn tree(&self, node: Option<Uuid>, recursive: bool) -> Result<TreeNode> {
        let arena = self.arena.read().await;
        let start = match node {
            Some(id) => id,
            None => arena.root,
        };
        arena.tree_view(start, recursive, 0)
    }

    /// All clips carrying voice activation with at least one trigger,
    /// in depth-first tree order.
    pub async fn voice_clips(&self) -> Vec<Node> {
        fn walk(arena: &NodeArena, id: Uuid, out: &mut Vec<Node>) {
            let Some(node) = arena.nodes.get(&id) else {
                return;
            };
            if let Some(clip) = node.clip() {
                let has_triggers = clip
                    .voice
                    .as_ref()
                    .map(|v| !v.triggers.is_empty())
                    .unwrap_or(false);
                if has_triggers {
                    out.push(node.clone());
                }
            }
            if let Some(children) = node.children() {
                for child in children {
                    walk(arena, *child, out);
                }
            }
        }
        let arena = self.arena.read().await;
        let mut out = Vec::new();
        walk(&arena, arena.root, &mut out);
        out
    }

    pub async fn create_directory(
        &self,
        parent: Option<Uuid>,
        name: String,
        icon: Option<String>,
        tags: Vec<String>,
    ) -> Result<Mutation> {
        let mut arena = self.arena.write().await;
        let parent_id = arena.resolve_directory(parent)?;
        let previous = arena.root_watermark();

        let mut node = Node::new_directory(Some(parent_id), name);
        node.icon = icon;
        node.tags = tags;
        let id = node.id;

        arena.nodes.insert(id, node.clone());
        arena.attach(parent_id, id)?;

        let mut ops = vec![PersistOp::Upsert(node)];
        arena.propagate(parent_id, &mut ops);
        self.send_ops(ops);

        Ok(Mutation {
            node: arena.get(id)?.clone(),
            previous_watermark: previous,
            changed: true,
            removed_clips: Vec::new(),
        })
    }

    /// Publish an uploaded clip: move the temp file into place, insert the
    /// node, and propagate watermarks — all inside one write section. The
    /// caller removes the temp artifact if this fails.
    pub async fn publish_clip(
        &self,
        parent: Option<Uuid>,
        clip: NewClip,
        temp_path: &Path,
        final_path: &Path,
    ) -> Result<Mutation> {
        let mut arena = self.arena.write().await;
        let parent_id = arena.resolve_directory(parent)?;
        let previous = arena.root_watermark();

        std::fs::rename(temp_path, final_path)?;

        let mut node = Node::new_clip(
            parent_id,
            clip.name,
            ClipData {
                storage_key: clip.storage_key,
                duration_ms: clip.duration_ms,
                valid: clip.valid,
                voice: clip.voice,
            },
        );
        node.icon = clip.icon;
        node.tags = clip.tags;
        let id = node.id;

        arena.nodes.insert(id, node.clone());
        arena.attach(parent_id, id)?;

        let mut ops = vec![PersistOp::Upsert(node)];
        arena.propagate(parent_id, &mut ops);
        self.send_ops(ops);

        Ok(Mutation {
            node: arena.get(id)?.clone(),
            previous_watermark: previous,
            changed: true,
            removed_clips: Vec::new(),
        })
    }

    pub async fn edit(&self, id: Uuid, fields: EditFields) -> Result<Mutation> {
        let mut arena = self.arena.write().await;
        let current = arena.get(id)?.clone();
        if current.is_root() {
            return Err(Error::RootProtected("the root cannot be edited".into()));
        }
        if fields.voice.is_some() && current.is_directory() {
            return Err(Error::Invalid(
                "voice activation applies to clips only".into(),
            ));
        }
        let previous = arena.root_watermark();

        let mut updated = current.clone();
        if let Some(name) = fields.name {
            updated.name = name;
        }
        if let Some(icon) = fields.icon {
            updated.icon = if icon.is_empty() { None } else { Some(icon) };
        }
        if let Some(tags) = fields.tags {
            updated.tags = tags;
        }
        if let Some(voice) = fields.voice {
            if let NodeKind::Clip(data) = &mut updated.kind {
                data.voice = if voice.triggers.is_empty() {
                    None
                } else {
                    Some(voice)
                };
            }
        }

        if updated == current {
            return Ok(Mutation {
                node: current,
                previous_watermark: previous,
                changed: false,
                removed_clips: Vec::new(),
            });
        }

        arena.nodes.insert(id, updated.clone());
        let mut ops = vec![PersistOp::Upsert(updated)];
        let anchor = arena.watermark_anchor(id)?;
        arena.propagate(anchor, &mut ops);
        self.send_ops(ops);

        Ok(Mutation {
            node: arena.get(id)?.clone(),
            previous_watermark: previous,
            changed: true,
            removed_clips: Vec::new(),
        })
    }

    pub async fn move_node(&self, id: Uuid, target: Option<Uuid>) -> Result<Mutation> {
        let mut arena = self.arena.write().await;
        let target_id = arena.resolve_directory(target)?;
        let node = arena.get(id)?.clone();
        let Some(old_parent) = node.parent else {
            return Err(Error::RootProtected("the root cannot be moved".into()));
        };
        if arena.is_in_subtree(target_id, id) {
            return Err(Error::Invalid(
                "cannot move a directory into its own subtree".into(),
            ));
        }
        let previous = arena.root_watermark();

        if old_parent == target_id {
            return Ok(Mutation {
                node,
                previous_watermark: previous,
                changed: false,
                removed_clips: Vec::new(),
            });
        }

        arena.detach(old_parent, id)?;
        arena.attach(target_id, id)?;
        if let Some(n) = arena.nodes.get_mut(&id) {
            n.parent = Some(target_id);
        }

        let mut ops = vec![PersistOp::Upsert(arena.get(id)?.clone())];
        // One token covers both touched chains; the walk stops at shared
        // ancestors that already carry it.
        let token = Watermark::fresh();
        arena.propagate_token(old_parent, token, &mut ops);
        arena.propagate_token(target_id, token, &mut ops);
        self.send_ops(ops);

        Ok(Mutation {
            node: arena.get(id)?.clone(),
            previous_watermark: previous,
            changed: true,
            removed_clips: Vec::new(),
        })
    }

    /// Delete a node; recursive for directories. Descendants are removed
    /// from the cache and persist-deleted before the parent unlinks the
    /// node itself.
    pub async fn delete(&self, id: Uuid) -> Result<Mutation> {
        let mut arena = self.arena.write().await;
        let node = arena.get(id)?.clone();
        let Some(parent) = node.parent else {
            return Err(Error::RootProtected("the root cannot be deleted".into()));
        };
        let previous = arena.root_watermark();

        let mut doomed = Vec::new();
        arena.subtree_post_order(id, &mut doomed);

        let mut removed_clips = Vec::new();
        let mut ops = Vec::with_capacity(doomed.len() + 4);
        for victim in &doomed {
            if let Some(removed) = arena.nodes.remove(victim) {
                if let Some(clip) = removed.clip() {
                    removed_clips.push(clip.storage_key.clone());
                }
            }
            ops.push(PersistOp::Delete(*victim));
        }

        arena.detach(parent, id)?;
        arena.propagate(parent, &mut ops);
        self.send_ops(ops);

        Ok(Mutation {
            node,
            previous_watermark: previous,
            changed: true,
            removed_clips,
        })
    }

    /// Test constructor: an empty tree with a fresh root and a captured
    /// persistence queue.
    #[cfg(test)]
    pub(crate) fn in_memory() -> (Self, mpsc::UnboundedReceiver<PersistOp>) {
        let root = Node::new_directory(None, "root");
        let mut nodes = HashMap::new();
        let root_id = root.id;
        nodes.insert(root_id, root);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        (
            Self {
                arena: RwLock::new(NodeArena {
                    nodes,
                    root: root_id,
                }),
                persist_tx,
            },
            persist_rx,
        )
    }
}

async fn persist_worker(pool: Pool<Sqlite>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        let result = match &op {
            PersistOp::Upsert(node) => {
                db::nodes::upsert(&pool, &db::nodes::NodeRecord::from_node(node)).await
            }
            PersistOp::Delete(id) => db::nodes::delete(&pool, *id).await,
        };
        if let Err(e) = result {
            error!("node persistence failed: {e}");
        }
    }
}
