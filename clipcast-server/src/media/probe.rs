//! Clip metadata probing using symphonia
//!
//! Uploads are probed once for duration and decodability; the result is
//! stored on the clip node. A file the probe cannot read is still
//! accepted, just marked invalid with an unknown length.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// What probing an upload yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipMetadata {
    /// Clip length in milliseconds; 0 when unknown.
    pub duration_ms: u64,
    /// Whether the audio decoded cleanly.
    pub valid: bool,
}

/// Metadata probing capability.
#[async_trait]
pub trait ClipProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ClipMetadata>;
}

/// symphonia-backed probe.
pub struct SymphoniaProbe;

#[async_trait]
impl ClipProbe for SymphoniaProbe {
    async fn probe(&self, path: &Path) -> Result<ClipMetadata> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_blocking(&path))
            .await
            .map_err(|e| Error::Internal(format!("probe task failed: {e}")))?
    }
}

fn probe_blocking(path: &Path) -> Result<ClipMetadata> {
    // An unopenable file is a real I/O failure; an unreadable format is
    // merely an invalid clip.
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            warn!("could not probe {}: {e}", path.display());
            return Ok(ClipMetadata {
                duration_ms: 0,
                valid: false,
            });
        }
    };

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL);
    let Some(track) = track else {
        warn!("no decodable track in {}", path.display());
        return Ok(ClipMetadata {
            duration_ms: 0,
            valid: false,
        });
    };

    let params = &track.codec_params;
    let duration_ms = match (params.time_base, params.n_frames) {
        (Some(time_base), Some(n_frames)) => {
            let time = time_base.calc_time(n_frames);
            time.seconds * 1000 + (time.frac * 1000.0) as u64
        }
        _ => 0,
    };

    debug!("probed {}: {}ms", path.display(), duration_ms);
    Ok(ClipMetadata {
        duration_ms,
        valid: true,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Fixed-answer probe for upload tests.
    pub struct StubProbe {
        pub metadata: ClipMetadata,
    }

    impl StubProbe {
        pub fn new(duration_ms: u64, valid: bool) -> Self {
            Self {
                metadata: ClipMetadata { duration_ms, valid },
            }
        }
    }

    #[async_trait]
    impl ClipProbe for StubProbe {
        async fn probe(&self, path: &Path) -> Result<ClipMetadata> {
            // The temp artifact must exist when the probe runs
            let _ = std::fs::metadata(path)?;
            Ok(self.metadata)
        }
    }
}
