//! HTTP/SSE transport
//!
//! Thin axum layer mapping the orchestrator's transport-agnostic
//! operations onto routes, plus the SSE event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{run, AppContext};
