use crate::config::Config;
use crate::engine::{EngineError, EngineHandle, SharedState};
use rollcall_core::registration::{ReferenceImage, RegistrationError, RegistrationRequest};
use rollcall_core::types::TIMESTAMP_FORMAT;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::PoisonError;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    engine: EngineHandle,
    shared: SharedState,
    frame_source: String,
    tolerance: f32,
    mirror: bool,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, shared: SharedState, config: &Config) -> Self {
        Self {
            engine,
            shared,
            frame_source: config.frame_source.clone(),
            tolerance: config.tolerance,
            mirror: config.mirror,
        }
    }
}

/// Map engine failures onto D-Bus errors: caller mistakes become
/// `InvalidArgs`, everything else `Failed`.
fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match &e {
        EngineError::Registration(
            RegistrationError::EmptyLabel
            | RegistrationError::NoImages
            | RegistrationError::DuplicateLabel(_)
            | RegistrationError::UnknownIdentity(_),
        ) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn reference_images(paths: Vec<String>) -> Vec<ReferenceImage> {
    paths
        .into_iter()
        .map(|p| ReferenceImage::Path(PathBuf::from(p)))
        .collect()
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Register a new identity from reference image files.
    ///
    /// `attributes_json` is a flat JSON object of string attributes (course,
    /// department, ...); pass `{}` for none. Returns the registration report.
    async fn register(
        &self,
        label: &str,
        attributes_json: &str,
        image_paths: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(label, images = image_paths.len(), "register requested");
        let attributes: BTreeMap<String, String> = if attributes_json.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(attributes_json).map_err(|e| {
                zbus::fdo::Error::InvalidArgs(format!("attributes must be a JSON object of strings: {e}"))
            })?
        };

        let report = self
            .engine
            .register(RegistrationRequest {
                label: label.to_string(),
                attributes,
                images: reference_images(image_paths),
            })
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Append descriptors from more reference images to an existing identity.
    async fn enroll(&self, identity_id: &str, image_paths: Vec<String>) -> zbus::fdo::Result<String> {
        tracing::info!(identity = identity_id, images = image_paths.len(), "enroll requested");
        let report = self
            .engine
            .enroll(identity_id.to_string(), reference_images(image_paths))
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// List registered identities (without descriptor values).
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let registry = self
            .shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let identities: Vec<_> = registry
            .records()
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "label": r.label,
                    "attributes": r.attributes,
                    "descriptors": r.descriptors.len(),
                    "created_at": r.created_at.format(TIMESTAMP_FORMAT).to_string(),
                })
            })
            .collect();
        to_json(&identities)
    }

    /// Identities seen during this run, in order of first appearance.
    async fn attendance(&self) -> zbus::fdo::Result<String> {
        let entries: Vec<_> = self
            .shared
            .tracker
            .snapshot()
            .into_iter()
            .map(|entry| {
                serde_json::json!({
                    "label": entry.label,
                    "first_seen": entry.first_seen.format(TIMESTAMP_FORMAT).to_string(),
                })
            })
            .collect();
        to_json(&entries)
    }

    /// Annotations of the most recently presented frame, or `null`.
    async fn current_frame(&self) -> zbus::fdo::Result<String> {
        to_json(&self.shared.latest.get())
    }

    /// Reload the registry from the identity store. Returns the identity count.
    async fn reload(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("reload requested");
        let count = self.engine.reload().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let (identities, descriptors) = {
            let registry = self
                .shared
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            (registry.len(), registry.descriptor_count())
        };
        let frames = self.shared.latest.get().map(|f| f.frame).unwrap_or(0);
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "frame_source": self.frame_source,
            "tolerance": self.tolerance,
            "mirror": self.mirror,
            "identities": identities,
            "descriptors": descriptors,
            "present": self.shared.tracker.len(),
            "frames": frames,
            "stopping": self.shared.stop.is_stopped(),
        })
        .to_string())
    }

    /// Ask the live loop to stop. The daemon exits once the loop has ended.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        let already = self.shared.stop.is_stopped();
        self.shared.stop.stop();
        tracing::info!(already, "stop requested");
        Ok(!already)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::StoreError;

    #[test]
    fn test_caller_mistakes_map_to_invalid_args() {
        let err = to_fdo(EngineError::Registration(RegistrationError::DuplicateLabel(
            "Alice".into(),
        )));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(ref m) if m.contains("Alice")));

        let err = to_fdo(EngineError::Registration(RegistrationError::NoImages));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn test_other_failures_map_to_failed() {
        let err = to_fdo(EngineError::ChannelClosed);
        assert!(matches!(err, zbus::fdo::Error::Failed(_)));

        let err = to_fdo(EngineError::Store(StoreError::Backend("disk full".into())));
        assert!(matches!(err, zbus::fdo::Error::Failed(ref m) if m.contains("disk full")));
    }

    #[test]
    fn test_reference_images_from_paths() {
        let images = reference_images(vec!["/tmp/a.jpg".into(), "/tmp/b.png".into()]);
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].name(), "/tmp/b.png");
    }
}
