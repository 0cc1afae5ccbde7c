//! Shared clip tree
//!
//! The in-memory node arena, the single-writer `NodeStore` guarding it,
//! and watermark propagation. All external holders reference nodes by id
//! and re-resolve through the store before acting on them.

mod node;
mod store;

pub use node::{ClipData, Node, NodeKind};
pub use store::{EditFields, Mutation, NewClip, NodeStore};
