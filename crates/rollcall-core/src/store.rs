//! Identity store seam: durable persistence lives behind this trait.

use crate::types::{Descriptor, IdentityRecord};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("label already registered: {0}")]
    DuplicateLabel(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("backend: {0}")]
    Backend(String),
}

/// Durable storage of identities and their reference descriptors.
pub trait IdentityStore: Send {
    /// Every stored identity, in registration order, descriptors in insertion order.
    fn load_all(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    /// Persist a new identity with all of its descriptors, atomically.
    fn insert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    /// Append one descriptor to an existing identity.
    fn append(&self, identity_id: &str, descriptor: &Descriptor) -> Result<(), StoreError>;
}

/// Process-local store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<IdentityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<IdentityRecord>> {
        self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl IdentityStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.lock().clone())
    }

    fn insert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let mut records = self.lock();
        if records.iter().any(|r| r.label == record.label) {
            return Err(StoreError::DuplicateLabel(record.label.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn append(&self, identity_id: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == identity_id)
            .ok_or_else(|| StoreError::NotFound(identity_id.to_string()))?;
        record.descriptors.push(descriptor.clone());
        Ok(())
    }
}
