use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::values::{ObjId, Value};

/// A node in the world graph. The persisted document form is this struct
/// verbatim, camel-cased, keyed by `id` in the world collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldObject {
    pub id: ObjId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_ids: Vec<ObjId>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    #[serde(default)]
    pub location_id: Option<ObjId>,
    #[serde(default)]
    pub content_ids: HashSet<ObjId>,
    #[serde(default)]
    pub owner_id: Option<ObjId>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl WorldObject {
    pub fn new(id: ObjId) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: String::new(),
            description: String::new(),
            parent_ids: Vec::new(),
            attributes: HashMap::new(),
            location_id: None,
            content_ids: HashSet::new(),
            owner_id: None,
            created: now,
            updated: now,
        }
    }

    pub fn with_parent(id: ObjId, parent: ObjId) -> Self {
        let mut o = Self::new(id);
        o.parent_ids.push(parent);
        o
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_owner(mut self, owner: ObjId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    /// Own attribute, no inheritance. Inheritance-aware resolution lives on
    /// the world cache.
    pub fn own_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
        self.updated = Utc::now();
    }
}
