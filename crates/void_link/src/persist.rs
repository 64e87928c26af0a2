//! Persisted link records
//!
//! A link property is saved as a pair of strings, the target identifier
//! and the partition it lives in. Empty strings mean "no reference". Each
//! object also saves a back-links section naming every object that
//! references it.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::{LinkRef, LinkableId, PartitionId};

/// Saved form of a single reference
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub partition: String,
}

impl LinkRecord {
    /// Record for an optional reference
    pub fn from_link(link: Option<&LinkRef>) -> Self {
        match link {
            Some(link) => Self {
                guid: link.id.to_string(),
                partition: link.partition.to_string(),
            },
            None => Self::default(),
        }
    }

    /// Decode the record; empty fields (or a nil id) decode to `None`
    pub fn to_link(&self) -> Result<Option<LinkRef>> {
        let id = LinkableId::parse(&self.guid)?;
        match PartitionId::new(&self.partition) {
            Some(partition) if !id.is_nil() => Ok(Some(LinkRef::new(id, partition))),
            _ => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.guid.is_empty() && self.partition.is_empty()
    }
}

impl From<&LinkRef> for LinkRecord {
    fn from(link: &LinkRef) -> Self {
        Self::from_link(Some(link))
    }
}

/// Saved back-links section of an object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackLinksRecord {
    #[serde(default, rename = "link")]
    pub links: Vec<LinkRecord>,
}

impl BackLinksRecord {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_no_reference() {
        let record = LinkRecord::from_link(None);
        assert!(record.is_empty());
        assert_eq!(record.to_link(), Ok(None));

        let nil = LinkRecord {
            guid: LinkableId::NIL.to_string(),
            partition: "cell".into(),
        };
        assert_eq!(nil.to_link(), Ok(None));
    }

    #[test]
    fn test_record_keeps_target() {
        let link = LinkRef::new(
            LinkableId::from_words(1, 2, 3, 4),
            PartitionId::new("cell_1_2").unwrap(),
        );
        let record = LinkRecord::from(&link);
        assert_eq!(record.guid, "00000001.00000002.00000003.00000004");
        assert_eq!(record.partition, "cell_1_2");
        assert_eq!(record.to_link(), Ok(Some(link)));
    }

    #[test]
    fn test_malformed_guid_is_rejected() {
        let record = LinkRecord {
            guid: "not-an-id".into(),
            partition: "cell".into(),
        };
        assert!(record.to_link().is_err());
    }

    #[test]
    fn test_back_links_section_json() {
        let section = BackLinksRecord {
            links: vec![LinkRecord {
                guid: "00000000.00000000.00000000.00000007".into(),
                partition: "cell".into(),
            }],
        };
        let json = serde_json::to_string(&section).unwrap();
        assert!(json.contains("\"link\""));
        let back: BackLinksRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, section);
        let empty: BackLinksRecord = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
