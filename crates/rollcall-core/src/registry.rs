//! In-memory registry of known identities.
//!
//! Lookup is linear: every query is compared with every reference descriptor
//! of every identity, O(records × descriptors). That is fine for tens to low
//! hundreds of identities; beyond that an index is needed.

use crate::store::{IdentityStore, StoreError};
use crate::types::{Descriptor, IdentityRecord};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("label already registered: {0}")]
    DuplicateLabel(String),
    #[error("identity not found: {0}")]
    NotFound(String),
}

/// Ordered collection of identity records. Order is registration order and
/// defines the tie-break order for matching.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    records: Vec<IdentityRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self { records }
    }

    /// Build a registry from everything the store holds.
    pub fn load_from(store: &dyn IdentityStore) -> Result<Self, StoreError> {
        let records = store.load_all()?;
        tracing::info!(
            identities = records.len(),
            descriptors = records.iter().map(|r| r.descriptors.len()).sum::<usize>(),
            "registry loaded"
        );
        Ok(Self::from_records(records))
    }

    /// Append a reference descriptor under `label`, creating a bare record if
    /// the label is new.
    pub fn register(&mut self, label: &str, descriptor: Descriptor) {
        match self.records.iter_mut().find(|r| r.label == label) {
            Some(record) => record.descriptors.push(descriptor),
            None => self.records.push(IdentityRecord {
                id: uuid::Uuid::new_v4().to_string(),
                label: label.to_string(),
                attributes: Default::default(),
                descriptors: vec![descriptor],
                created_at: chrono::Local::now(),
            }),
        }
    }

    /// Add a newly registered identity. Labels are unique.
    pub fn insert(&mut self, record: IdentityRecord) -> Result<(), RegistryError> {
        if self.contains_label(&record.label) {
            return Err(RegistryError::DuplicateLabel(record.label));
        }
        self.records.push(record);
        Ok(())
    }

    /// Append a descriptor to the identity with the given id.
    pub fn append(&mut self, identity_id: &str, descriptor: Descriptor) -> Result<(), RegistryError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == identity_id)
            .ok_or_else(|| RegistryError::NotFound(identity_id.to_string()))?;
        record.descriptors.push(descriptor);
        Ok(())
    }

    /// Every (label, reference descriptor) pair, in registry order.
    pub fn all_entries(&self) -> impl Iterator<Item = (&str, &Descriptor)> + '_ {
        self.records
            .iter()
            .flat_map(|r| r.descriptors.iter().map(move |d| (r.label.as_str(), d)))
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn get(&self, identity_id: &str) -> Option<&IdentityRecord> {
        self.records.iter().find(|r| r.id == identity_id)
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.records.iter().any(|r| r.label == label)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn descriptor_count(&self) -> usize {
        self.records.iter().map(|r| r.descriptors.len()).sum()
    }
}
