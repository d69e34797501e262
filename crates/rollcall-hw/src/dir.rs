//! Frame source that replays still images from a directory, in file-name
//! order. Used for offline runs and for exercising the pipeline without a
//! camera.

use image::RgbImage;
use rollcall_core::{FrameSource, FrameSourceError};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum DirSourceError {
    #[error("cannot read directory {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no images found in {0}")]
    Empty(String),
}

pub struct ImageDirSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    /// Collect the image files in `dir` (non-recursive), sorted by name.
    pub fn open(dir: &Path) -> Result<Self, DirSourceError> {
        let entries = std::fs::read_dir(dir).map_err(|source| DirSourceError::Read {
            path: dir.display().to_string(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(DirSourceError::Empty(dir.display().to_string()));
        }
        tracing::info!(dir = %dir.display(), images = files.len(), "image directory opened");
        Ok(Self { files, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    /// Undecodable files are skipped with a warning; `None` after the last file.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameSourceError> {
        while let Some(path) = self.files.get(self.next) {
            self.next += 1;
            match image::open(path) {
                Ok(img) => return Ok(Some(img.to_rgb8())),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping undecodable image");
                }
            }
        }
        Ok(None)
    }
}
