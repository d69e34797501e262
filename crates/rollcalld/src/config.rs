use rollcall_core::DEFAULT_TOLERANCE;
use std::path::{Path, PathBuf};

/// Where the live loop reads frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSourceKind {
    /// V4L2 capture device, e.g. `/dev/video0`.
    Camera(String),
    /// Directory of still images replayed in name order.
    Directory(PathBuf),
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path or image directory (default: /dev/video0).
    pub frame_source: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match (inclusive).
    pub tolerance: f32,
    /// Flip frames horizontally before processing.
    pub mirror: bool,
    /// Number of frames to discard when the camera stream starts.
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_core::default_model_dir);

        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("identities.db"));

        Self {
            frame_source: var("ROLLCALL_FRAME_SOURCE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            db_path,
            tolerance: parse_tolerance(var("ROLLCALL_TOLERANCE")),
            mirror: var("ROLLCALL_MIRROR").map(|v| v != "0").unwrap_or(true),
            warmup_frames: parse_or(var("ROLLCALL_WARMUP_FRAMES"), 4),
        }
    }

    /// A path that names an existing directory selects image replay.
    pub fn frame_source_kind(&self) -> FrameSourceKind {
        let path = Path::new(&self.frame_source);
        if path.is_dir() {
            FrameSourceKind::Directory(path.to_path_buf())
        } else {
            FrameSourceKind::Camera(self.frame_source.clone())
        }
    }
}

/// Distances are non-negative, so only a finite value >= 0 is a usable
/// tolerance. Anything else falls back to the default with a warning.
fn parse_tolerance(value: Option<String>) -> f32 {
    let Some(raw) = value else {
        return DEFAULT_TOLERANCE;
    };
    match raw.trim().parse::<f32>() {
        Ok(t) if t.is_finite() && t >= 0.0 => t,
        _ => {
            tracing::warn!(
                value = %raw,
                fallback = DEFAULT_TOLERANCE,
                "invalid ROLLCALL_TOLERANCE; using default"
            );
            DEFAULT_TOLERANCE
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
