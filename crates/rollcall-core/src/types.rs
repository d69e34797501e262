use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display format for first-seen timestamps in annotation text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Label shown for faces that match no registered identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Fixed-length face descriptor (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance over the full vector.
    ///
    /// Returns `None` when the descriptors are not comparable (empty or of
    /// different lengths).
    pub fn distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

/// A registered identity and its reference descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub label: String,
    /// Registration metadata (name parts, computer number, course, ...).
    pub attributes: BTreeMap<String, String>,
    pub descriptors: Vec<Descriptor>,
    pub created_at: DateTime<Local>,
}

/// One face found in a frame, with its descriptor. Lives for one frame.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

/// Result of matching a query descriptor against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest distance seen, if any reference was comparable.
    pub distance: Option<f32>,
    /// ID of the matched identity (if any).
    pub identity_id: Option<String>,
    /// Label of the matched identity (if any).
    pub label: Option<String>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            identity_id: None,
            label: None,
        }
    }

    /// Label to display: the matched label or [`UNKNOWN_LABEL`].
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// First appearance of an identity during a live-loop run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub label: String,
    pub first_seen: DateTime<Local>,
}

/// Per-face output of the frame pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    /// Matched label, or `None` for an unknown face.
    pub label: Option<String>,
    pub distance: Option<f32>,
    pub first_seen: Option<DateTime<Local>>,
}

impl Annotation {
    /// Text rendered next to the face: `"<label> <first seen>"`, the bare
    /// label when untracked, or `"Unknown"`.
    pub fn text(&self) -> String {
        match (&self.label, &self.first_seen) {
            (Some(label), Some(ts)) => format!("{label} {}", ts.format(TIMESTAMP_FORMAT)),
            (Some(label), None) => label.clone(),
            (None, _) => UNKNOWN_LABEL.to_string(),
        }
    }
}
