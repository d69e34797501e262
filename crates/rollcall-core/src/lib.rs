//! rollcall-core: face identification engine for attendance tracking.
//!
//! Uses SCRFD for face detection and ArcFace for face descriptors, both
//! running via ONNX Runtime, then matches descriptors against a registry of
//! known identities and records when each identity was first seen.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod live;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod registration;
pub mod registry;
pub mod store;
pub mod tracker;
pub mod types;

pub use extractor::{DescriptorExtractor, FaceExtractor};
pub use live::{
    FrameSource, FrameSourceError, LiveLoop, LiveOptions, LoopSummary, PresentationSink, SinkControl,
    Step, StopReason, StopSignal,
};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
pub use registry::Registry;
pub use store::{IdentityStore, StoreError};
pub use tracker::SessionTracker;
pub use types::{
    Annotation, BoundingBox, Descriptor, DetectedFace, IdentityRecord, MatchResult, TrackingEntry,
};

use std::path::PathBuf;

/// System-wide model directory, used when no override is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
