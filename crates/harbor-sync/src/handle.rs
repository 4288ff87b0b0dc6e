//! Model and collection handles.
//!
//! A handle pairs an entity descriptor with in-memory attributes. The engine
//! reads a handle to build its request and writes the reconciled local state
//! back into it.

use std::sync::Arc;

use harbor_core::{identity_of, EntityDescriptor, Identity, Record};
use serde_json::Value;

/// One record of an entity.
#[derive(Debug, Clone)]
pub struct Model {
    entity: Arc<EntityDescriptor>,
    attributes: Record,
}

impl Model {
    pub fn new(entity: Arc<EntityDescriptor>, attributes: Record) -> Self {
        Self { entity, attributes }
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    /// The model's identity, read from the entity's id attribute.
    pub fn id(&self) -> Option<Identity> {
        identity_of(&self.attributes, self.entity.id_attribute())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attributes(&self) -> &Record {
        &self.attributes
    }

    pub(crate) fn replace(&mut self, attributes: Record) {
        self.attributes = attributes;
    }

    pub(crate) fn clear_id(&mut self) {
        let id_attribute = self.entity.id_attribute().to_string();
        self.attributes.insert(id_attribute, Value::Null);
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes.clone())
    }
}

/// A fetched set of records of an entity.
#[derive(Debug, Clone)]
pub struct Collection {
    entity: Arc<EntityDescriptor>,
    records: Vec<Record>,
}

impl Collection {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        Self {
            entity,
            records: Vec::new(),
        }
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Wrap each record in a model handle.
    pub fn models(&self) -> Vec<Model> {
        self.records
            .iter()
            .map(|r| Model::new(self.entity.clone(), r.clone()))
            .collect()
    }

    pub(crate) fn replace(&mut self, records: Vec<Record>) {
        self.records = records;
    }
}
