use crate::error::{Result, ServerError};
use crate::frame::FrameData;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// A non-empty, ordered set of JPEG frames played in a loop
#[derive(Debug)]
pub struct FrameLibrary {
    frames: Vec<FrameData>,
    source: PathBuf,
}

impl FrameLibrary {
    /// Load every `.jpg`/`.jpeg` file in `dir`, ordered by file name
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_jpeg_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let data = tokio::fs::read(&path).await?;
            let frame = FrameData::new(frames.len() as u64 + 1, SystemTime::now(), data);
            if !frame.is_jpeg() {
                warn!("Skipping {}: not a JPEG image", path.display());
                continue;
            }
            debug!("Loaded frame {} ({} bytes)", path.display(), frame.len());
            frames.push(frame);
        }

        if frames.is_empty() {
            return Err(ServerError::NoFrames {
                dir: dir.display().to_string(),
            }
            .into());
        }
        info!("Loaded {} frames from {}", frames.len(), dir.display());

        Ok(Self {
            frames,
            source: dir.to_path_buf(),
        })
    }

    /// Build a library from in-memory JPEGs
    pub fn from_jpegs(jpegs: Vec<Bytes>) -> std::result::Result<Self, ServerError> {
        if jpegs.is_empty() {
            return Err(ServerError::NoFrames {
                dir: "<memory>".to_string(),
            });
        }
        let frames = jpegs
            .into_iter()
            .enumerate()
            .map(|(index, data)| FrameData::new(index as u64 + 1, SystemTime::now(), data))
            .collect();

        Ok(Self {
            frames,
            source: PathBuf::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Frame shown on `tick`, wrapping around at the end
    pub fn frame_at(&self, tick: u64) -> &FrameData {
        &self.frames[(tick % self.frames.len() as u64) as usize]
    }
}

fn is_jpeg_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}
