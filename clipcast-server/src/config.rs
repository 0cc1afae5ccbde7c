//! clipcast-server configuration

use std::path::PathBuf;

/// Server configuration, assembled from CLI arguments in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding clip audio files (and the `.incoming` upload area).
    pub media_dir: PathBuf,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    /// Run the live voice-trigger listener.
    pub voice: bool,
    /// Simulate audio output instead of opening a device.
    pub no_audio: bool,
}
