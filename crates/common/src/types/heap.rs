// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-snapshot heap side-table.
//!
//! Every array or object reached from a local or a static while building one step
//! record is registered here exactly once, keyed by its identity-derived [`RefId`].
//! Entries are one level deep: element and field values are short-form strings.

use std::collections::{btree_map, BTreeMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::RefId;

/// Representation of one heap object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeapEntry {
    /// An array and its elements in short form
    Array {
        /// Array type name, e.g. `int[]`
        #[serde(rename = "type")]
        type_name: String,
        /// Elements in index order
        elements: Vec<String>,
    },
    /// A general object and its instance fields in short form
    Object {
        /// Runtime type name
        #[serde(rename = "type")]
        type_name: String,
        /// Instance fields in declaration order
        fields: IndexMap<String, String>,
    },
}

impl HeapEntry {
    /// Runtime type name of the entry
    pub fn type_name(&self) -> &str {
        match self {
            Self::Array { type_name, .. } | Self::Object { type_name, .. } => type_name,
        }
    }

    /// Element type of an array entry (`int` for `int[]`)
    pub fn element_type(&self) -> Option<&str> {
        match self {
            Self::Array { type_name, .. } => type_name.strip_suffix("[]"),
            Self::Object { .. } => None,
        }
    }
}

/// Deduplicated heap objects of one step record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeapTable {
    entries: BTreeMap<RefId, HeapEntry>,
}

impl HeapTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry. The first entry registered for an id wins; returns `true` if
    /// the id was not present yet.
    pub fn insert(&mut self, id: RefId, entry: HeapEntry) -> bool {
        match self.entries.entry(id) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Whether an entry exists for the id
    pub fn contains(&self, id: RefId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Look an entry up
    pub fn get(&self, id: RefId) -> Option<&HeapEntry> {
        self.entries.get(&id)
    }

    /// Number of distinct objects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in id order
    pub fn iter(&self) -> btree_map::Iter<'_, RefId, HeapEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a HeapTable {
    type Item = (&'a RefId, &'a HeapEntry);
    type IntoIter = btree_map::Iter<'a, RefId, HeapEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(elements: &[&str]) -> HeapEntry {
        HeapEntry::Array {
            type_name: "int[]".into(),
            elements: elements.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut heap = HeapTable::new();
        assert!(heap.insert(RefId(3), array(&["1"])));
        assert!(!heap.insert(RefId(3), array(&["2"])));

        assert_eq!(heap.len(), 1);
        assert_eq!(heap.get(RefId(3)), Some(&array(&["1"])));
    }

    #[test]
    fn test_wire_shape() {
        let mut heap = HeapTable::new();
        heap.insert(RefId(1), array(&["1", "2", "3"]));
        let mut fields = IndexMap::new();
        fields.insert("next".to_string(), "@1".to_string());
        fields.insert("value".to_string(), "7".to_string());
        heap.insert(RefId(2), HeapEntry::Object { type_name: "Node".into(), fields });

        let json = serde_json::to_value(&heap).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "ref@1": {"type": "int[]", "elements": ["1", "2", "3"]},
                "ref@2": {"type": "Node", "fields": {"next": "@1", "value": "7"}},
            })
        );

        let back: HeapTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, heap);
    }

    #[test]
    fn test_element_type() {
        assert_eq!(array(&[]).element_type(), Some("int"));
        let object = HeapEntry::Object { type_name: "Node".into(), fields: IndexMap::new() };
        assert_eq!(object.element_type(), None);
        assert_eq!(object.type_name(), "Node");
    }
}
