//! Onboarding: reference images → one identity record (or more descriptors
//! for an existing one).

use crate::extractor::DescriptorExtractor;
use crate::registry::{Registry, RegistryError};
use crate::store::{IdentityStore, StoreError};
use crate::types::{Descriptor, IdentityRecord};
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// A reference image supplied for registration.
#[derive(Debug, Clone)]
pub enum ReferenceImage {
    /// Image file on disk, decoded on use.
    Path(PathBuf),
    /// Already-decoded image with a caller-chosen name for reporting.
    Decoded { name: String, image: RgbImage },
}

impl ReferenceImage {
    pub fn name(&self) -> String {
        match self {
            ReferenceImage::Path(path) => path.display().to_string(),
            ReferenceImage::Decoded { name, .. } => name.clone(),
        }
    }

    fn load(&self) -> Result<RgbImage, String> {
        match self {
            ReferenceImage::Path(path) => image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|e| format!("cannot decode image: {e}")),
            ReferenceImage::Decoded { image, .. } => Ok(image.clone()),
        }
    }
}

/// A new identity to register.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub label: String,
    pub attributes: BTreeMap<String, String>,
    pub images: Vec<ReferenceImage>,
}

/// An image that produced no descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFailure {
    pub index: usize,
    pub image: String,
    pub reason: String,
}

/// Outcome of a successful registration or enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub identity_id: String,
    pub label: String,
    /// Descriptors added by this call.
    pub descriptors_added: usize,
    pub failed: Vec<ImageFailure>,
}

impl RegistrationReport {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("no reference images supplied")]
    NoImages,
    #[error("label already registered: {0}")]
    DuplicateLabel(String),
    #[error("identity not found: {0}")]
    UnknownIdentity(String),
    #[error("none of the {} reference images yielded a face descriptor", .failed.len())]
    NoUsableDescriptor { failed: Vec<ImageFailure> },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl From<RegistryError> for RegistrationError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateLabel(label) => RegistrationError::DuplicateLabel(label),
            RegistryError::NotFound(id) => RegistrationError::UnknownIdentity(id),
        }
    }
}

/// One descriptor per image that yields a face; the most confident face
/// (first on ties) when an image shows several.
fn describe_images(
    extractor: &mut dyn DescriptorExtractor,
    images: &[ReferenceImage],
) -> (Vec<Descriptor>, Vec<ImageFailure>) {
    let mut descriptors = Vec::new();
    let mut failed = Vec::new();

    for (index, reference) in images.iter().enumerate() {
        let outcome = reference.load().and_then(|image| {
            extractor
                .extract(&image)
                .into_iter()
                .min_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence))
                .map(|face| face.descriptor)
                .ok_or_else(|| "no face detected".to_string())
        });

        match outcome {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(reason) => {
                tracing::warn!(index, image = %reference.name(), %reason, "reference image rejected");
                failed.push(ImageFailure {
                    index,
                    image: reference.name(),
                    reason,
                });
            }
        }
    }

    (descriptors, failed)
}

/// Register a new identity from its reference images.
///
/// The record is persisted only when at least one image produced a
/// descriptor; it then enters the registry so the live loop sees it on the
/// next frame.
pub fn register_identity(
    extractor: &mut dyn DescriptorExtractor,
    store: &dyn IdentityStore,
    registry: &RwLock<Registry>,
    request: RegistrationRequest,
) -> Result<RegistrationReport, RegistrationError> {
    let label = request.label.trim().to_string();
    if label.is_empty() {
        return Err(RegistrationError::EmptyLabel);
    }
    if request.images.is_empty() {
        return Err(RegistrationError::NoImages);
    }
    if registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_label(&label)
    {
        return Err(RegistrationError::DuplicateLabel(label));
    }

    let (descriptors, failed) = describe_images(extractor, &request.images);
    if descriptors.is_empty() {
        return Err(RegistrationError::NoUsableDescriptor { failed });
    }

    let record = IdentityRecord {
        id: uuid::Uuid::new_v4().to_string(),
        label,
        attributes: request.attributes,
        descriptors,
        created_at: chrono::Local::now(),
    };

    store.insert_identity(&record)?;

    let report = RegistrationReport {
        identity_id: record.id.clone(),
        label: record.label.clone(),
        descriptors_added: record.descriptors.len(),
        failed,
    };
    registry
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(record)?;

    tracing::info!(
        identity = %report.identity_id,
        label = %report.label,
        descriptors = report.descriptors_added,
        failed = report.failed_count(),
        "identity registered"
    );
    Ok(report)
}

/// Re-enrollment: append descriptors from new reference images to an
/// existing identity. Rejected entirely if no image yields a descriptor.
pub fn enroll_descriptors(
    extractor: &mut dyn DescriptorExtractor,
    store: &dyn IdentityStore,
    registry: &RwLock<Registry>,
    identity_id: &str,
    images: &[ReferenceImage],
) -> Result<RegistrationReport, RegistrationError> {
    if images.is_empty() {
        return Err(RegistrationError::NoImages);
    }
    let label = registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(identity_id)
        .map(|r| r.label.clone())
        .ok_or_else(|| RegistrationError::UnknownIdentity(identity_id.to_string()))?;

    let (descriptors, failed) = describe_images(extractor, images);
    if descriptors.is_empty() {
        return Err(RegistrationError::NoUsableDescriptor { failed });
    }

    let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
    for descriptor in &descriptors {
        store.append(identity_id, descriptor)?;
        registry.append(identity_id, descriptor.clone())?;
    }

    tracing::info!(identity = identity_id, %label, added = descriptors.len(), "descriptors enrolled");
    Ok(RegistrationReport {
        identity_id: identity_id.to_string(),
        label,
        descriptors_added: descriptors.len(),
        failed,
    })
}
