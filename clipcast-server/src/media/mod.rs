//! Media file handling
//!
//! Upload probing lives here; the files themselves are plain entries in
//! the media directory, named by their storage key.

pub mod probe;

pub use probe::{ClipMetadata, ClipProbe, SymphoniaProbe};
