//! Typed item properties
//!
//! A [`PropertySchema`] names the properties of a class of items;
//! a [`PropertyTable`] holds one item's values and exposes its link
//! properties to the link manager.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use void_link::{LinkRecord, LinkRef, PropertyIndex, PropertyKind, PropertyStore};

use crate::error::{Result, WorldError};
use crate::partition::PartitionLock;

/// Type of a single property
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Link,
    LinkArray,
    Text,
    Number,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub ty: PropertyType,
}

/// Ordered property layout of a class of items
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

impl PropertySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.properties.push(PropertyDef { name: name.into(), ty });
        self
    }

    pub fn link(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyType::Link)
    }

    pub fn link_array(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyType::LinkArray)
    }

    pub fn text(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyType::Text)
    }

    pub fn number(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyType::Number)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Position of the property called `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn property_type(&self, property: usize) -> Option<PropertyType> {
        self.properties.get(property).map(|p| p.ty)
    }

    fn default_value(ty: PropertyType) -> PropertyValue {
        match ty {
            PropertyType::Link => PropertyValue::Link(None),
            PropertyType::LinkArray => PropertyValue::LinkArray(Vec::new()),
            PropertyType::Text => PropertyValue::Text(String::new()),
            PropertyType::Number => PropertyValue::Number(0.0),
        }
    }
}

/// In-memory value of one property
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Link(Option<LinkRef>),
    LinkArray(Vec<Option<LinkRef>>),
    Text(String),
    Number(f64),
}

/// Saved value of one property
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyRecord {
    Link(LinkRecord),
    LinkArray(Vec<LinkRecord>),
    Text(String),
    Number(f64),
}

impl PropertyRecord {
    fn ty(&self) -> PropertyType {
        match self {
            PropertyRecord::Link(_) => PropertyType::Link,
            PropertyRecord::LinkArray(_) => PropertyType::LinkArray,
            PropertyRecord::Text(_) => PropertyType::Text,
            PropertyRecord::Number(_) => PropertyType::Number,
        }
    }
}

/// Property values of a single item
pub struct PropertyTable {
    schema: Arc<PropertySchema>,
    values: RwLock<Vec<PropertyValue>>,
    lock: RwLock<PartitionLock>,
}

impl PropertyTable {
    /// Table with every property at its default
    pub fn new(schema: Arc<PropertySchema>, lock: PartitionLock) -> Self {
        let values = schema
            .properties
            .iter()
            .map(|p| PropertySchema::default_value(p.ty))
            .collect();
        Self {
            schema,
            values: RwLock::new(values),
            lock: RwLock::new(lock),
        }
    }

    /// Rebuild a table from saved records
    pub fn from_records(
        schema: Arc<PropertySchema>,
        records: &[PropertyRecord],
        lock: PartitionLock,
    ) -> Result<Self> {
        let mismatch = |reason: String| WorldError::SchemaMismatch {
            schema: schema.name.clone(),
            reason,
        };
        if records.len() != schema.len() {
            return Err(mismatch(format!(
                "expected {} properties, found {}",
                schema.len(),
                records.len()
            )));
        }

        let mut values = Vec::with_capacity(records.len());
        for (def, record) in schema.properties.iter().zip(records) {
            if def.ty != record.ty() {
                return Err(mismatch(format!("property {} has type {:?}", def.name, record.ty())));
            }
            let value = match record {
                PropertyRecord::Link(link) => PropertyValue::Link(link.to_link()?),
                PropertyRecord::LinkArray(links) => PropertyValue::LinkArray(
                    links
                        .iter()
                        .map(LinkRecord::to_link)
                        .collect::<void_link::Result<Vec<_>>>()?,
                ),
                PropertyRecord::Text(text) => PropertyValue::Text(text.clone()),
                PropertyRecord::Number(number) => PropertyValue::Number(*number),
            };
            values.push(value);
        }

        Ok(Self {
            schema,
            values: RwLock::new(values),
            lock: RwLock::new(lock),
        })
    }

    /// Saved form of every property
    pub fn to_records(&self) -> Vec<PropertyRecord> {
        self.values
            .read()
            .iter()
            .map(|value| match value {
                PropertyValue::Link(link) => {
                    PropertyRecord::Link(LinkRecord::from_link(link.as_ref()))
                }
                PropertyValue::LinkArray(links) => PropertyRecord::LinkArray(
                    links
                        .iter()
                        .map(|link| LinkRecord::from_link(link.as_ref()))
                        .collect(),
                ),
                PropertyValue::Text(text) => PropertyRecord::Text(text.clone()),
                PropertyValue::Number(number) => PropertyRecord::Number(*number),
            })
            .collect()
    }

    pub fn schema(&self) -> &Arc<PropertySchema> {
        &self.schema
    }

    pub fn value(&self, property: usize) -> Option<PropertyValue> {
        self.values.read().get(property).cloned()
    }

    /// Set a non-link property
    pub fn set_value(&self, property: usize, value: PropertyValue) -> bool {
        let mut values = self.values.write();
        match values.get_mut(property) {
            Some(slot) if std::mem::discriminant(slot) == std::mem::discriminant(&value) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Follow the item into another partition's lock
    pub fn set_lock(&self, lock: PartitionLock) {
        *self.lock.write() = lock;
    }
}

impl PropertyStore for PropertyTable {
    fn property_count(&self) -> usize {
        self.schema.len()
    }

    fn property_kind(&self, property: usize) -> PropertyKind {
        match self.schema.property_type(property) {
            Some(PropertyType::Link) => PropertyKind::Link,
            Some(PropertyType::LinkArray) => PropertyKind::LinkArray,
            _ => PropertyKind::Other,
        }
    }

    fn link_value(&self, property: usize) -> Option<LinkRef> {
        match self.values.read().get(property) {
            Some(PropertyValue::Link(link)) => link.clone(),
            _ => None,
        }
    }

    fn link_array(&self, property: usize) -> Vec<Option<LinkRef>> {
        match self.values.read().get(property) {
            Some(PropertyValue::LinkArray(links)) => links.clone(),
            _ => Vec::new(),
        }
    }

    fn set_link_value(&self, index: PropertyIndex, value: Option<LinkRef>) {
        let mut values = self.values.write();
        match (values.get_mut(index.property), index.element) {
            (Some(PropertyValue::Link(slot)), None) => *slot = value,
            (Some(PropertyValue::LinkArray(slots)), Some(element)) => {
                if let Some(slot) = slots.get_mut(element) {
                    *slot = value;
                }
            }
            _ => log::warn!("Ignoring link write to {} of schema {}", index, self.schema.name),
        }
    }

    fn reset_to_default(&self, property: usize) {
        if let Some(ty) = self.schema.property_type(property) {
            if let Some(slot) = self.values.write().get_mut(property) {
                *slot = PropertySchema::default_value(ty);
            }
        }
    }

    fn remove_array_element(&self, property: usize, element: usize) {
        if let Some(PropertyValue::LinkArray(slots)) = self.values.write().get_mut(property) {
            if element < slots.len() {
                slots.remove(element);
            }
        }
    }

    fn insert_array_element(&self, property: usize, element: usize, value: Option<LinkRef>) {
        if let Some(PropertyValue::LinkArray(slots)) = self.values.write().get_mut(property) {
            let at = element.min(slots.len());
            slots.insert(at, value);
        }
    }

    fn is_editable(&self) -> bool {
        !self.lock.read().is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_link::{LinkableId, PartitionId};

    fn schema() -> Arc<PropertySchema> {
        Arc::new(
            PropertySchema::new("switch")
                .text("label")
                .link("target")
                .link_array("extra"),
        )
    }

    fn target() -> LinkRef {
        LinkRef::new(LinkableId::from_u128(7), PartitionId::new("cell").unwrap())
    }

    #[test]
    fn test_defaults_and_kinds() {
        let table = PropertyTable::new(schema(), PartitionLock::default());
        assert_eq!(table.property_count(), 3);
        assert_eq!(table.property_kind(0), PropertyKind::Other);
        assert_eq!(table.property_kind(1), PropertyKind::Link);
        assert_eq!(table.property_kind(2), PropertyKind::LinkArray);
        assert_eq!(table.link_value(1), None);
        assert!(table.link_array(2).is_empty());
        assert_eq!(table.schema().index_of("extra"), Some(2));
    }

    #[test]
    fn test_records_round_trip_through_json() {
        let table = PropertyTable::new(schema(), PartitionLock::default());
        table.set_value(0, PropertyValue::Text("lobby".into()));
        table.set_link_value(PropertyIndex::single(1), Some(target()));
        table.insert_array_element(2, 0, None);
        table.insert_array_element(2, 1, Some(target()));

        let json = serde_json::to_string(&table.to_records()).unwrap();
        let records: Vec<PropertyRecord> = serde_json::from_str(&json).unwrap();
        let loaded = PropertyTable::from_records(
            schema(),
            &records,
            PartitionLock::default(),
        )
        .unwrap();

        assert_eq!(loaded.value(0), Some(PropertyValue::Text("lobby".into())));
        assert_eq!(loaded.link_value(1), Some(target()));
        assert_eq!(loaded.link_array(2), vec![None, Some(target())]);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let records = vec![PropertyRecord::Number(1.0)];
        assert!(matches!(
            PropertyTable::from_records(schema(), &records, PartitionLock::default()),
            Err(WorldError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_lock_controls_editability() {
        let lock = PartitionLock::default();
        let table = PropertyTable::new(schema(), lock.clone());
        assert!(table.is_editable());
        lock.set_locked(true);
        assert!(!table.is_editable());
        table.set_lock(PartitionLock::default());
        assert!(table.is_editable());
    }
}
