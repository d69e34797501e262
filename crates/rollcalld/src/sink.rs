//! Headless presentation: log arrivals and publish the latest annotations.

use chrono::{DateTime, Local};
use image::RgbImage;
use rollcall_core::{Annotation, PresentationSink, SinkControl};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// The most recently presented frame, as returned by `CurrentFrame()`.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub frame: u64,
    pub presented_at: DateTime<Local>,
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceLabel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceLabel {
    pub text: String,
    #[serde(flatten)]
    pub annotation: Annotation,
}

/// Shared slot holding the latest [`FrameSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct LatestFrame(Arc<Mutex<Option<FrameSnapshot>>>);

impl LatestFrame {
    pub fn get(&self) -> Option<FrameSnapshot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, snapshot: FrameSnapshot) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

/// Sink used by the daemon in place of a display window. Never asks to quit;
/// the daemon stops through its stop signal instead.
pub struct LogSink {
    latest: LatestFrame,
    announced: HashSet<String>,
    frames: u64,
}

impl LogSink {
    pub fn new(latest: LatestFrame) -> Self {
        Self {
            latest,
            announced: HashSet::new(),
            frames: 0,
        }
    }
}

impl PresentationSink for LogSink {
    fn present(&mut self, frame: &RgbImage, annotations: &[Annotation]) -> SinkControl {
        self.frames += 1;

        for annotation in annotations {
            let (Some(label), Some(first_seen)) = (&annotation.label, annotation.first_seen) else {
                continue;
            };
            if self.announced.insert(label.clone()) {
                tracing::info!(%label, first_seen = %first_seen.format(rollcall_core::types::TIMESTAMP_FORMAT), "arrived");
            }
        }
        let unknown = annotations.iter().filter(|a| a.label.is_none()).count();
        tracing::debug!(frame = self.frames, faces = annotations.len(), unknown, "frame presented");

        self.latest.set(FrameSnapshot {
            frame: self.frames,
            presented_at: Local::now(),
            width: frame.width(),
            height: frame.height(),
            faces: annotations
                .iter()
                .map(|a| FaceLabel {
                    text: a.text(),
                    annotation: a.clone(),
                })
                .collect(),
        });
        SinkControl::Continue
    }
}
