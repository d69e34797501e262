//! Descriptor extraction: image in, one (box, descriptor) per face out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// Model file names expected inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Errors that prevent an extractor from being built. Fatal at startup.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Strategy for turning a frame into face descriptors.
///
/// Implementations never fail per call: a frame that cannot be processed
/// yields an empty vector. Order follows the detector and is not stable
/// across frames.
pub trait DescriptorExtractor: Send {
    fn extract(&mut self, image: &RgbImage) -> Vec<DetectedFace>;
}

/// SCRFD detection followed by ArcFace encoding of every detected face.
pub struct FaceExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceExtractor {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models from `model_dir`, failing fast if either is unusable.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractorError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self::new(detector, recognizer))
    }
}

impl DescriptorExtractor for FaceExtractor {
    fn extract(&mut self, image: &RgbImage) -> Vec<DetectedFace> {
        let boxes = match self.detector.detect(image) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; skipping image");
                return Vec::new();
            }
        };

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match self.recognizer.encode(image, &bbox) {
                Ok(descriptor) => faces.push(DetectedFace { bbox, descriptor }),
                Err(e) => {
                    tracing::warn!(error = %e, confidence = bbox.confidence, "face encoding failed; skipping face");
                }
            }
        }
        faces
    }
}
