//! # Clipcast Common Library
//!
//! Shared code for the clipcast server and its clients:
//! - Event types (`ClipcastEvent` enum) and the broadcast `EventBus`
//! - Transport-agnostic API types (command envelope, status codes,
//!   flattened node views, play request shape)

pub mod api;
pub mod events;

pub use api::{CommandResponse, FlatNode, Watermark};
pub use events::{ClipcastEvent, EventBus};
