//! PlayerDirectory: best-effort cache from a stable external id to the most
//! recently observed display name and secondary id.
//!
//! Some event sources (chat, script hooks) only carry a transient display
//! name, so the directory also keeps a name → id index. Entries are never
//! pruned: departed players keep their last mapping so that delayed
//! disconnect events and late lookups still resolve.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One observed player identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    /// Stable id from the platform account (e.g. `steam_7656...`).
    pub external_id: String,
    pub display_name: String,
    /// Game-internal player id, when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_id: Option<String>,
}

impl PlayerRecord {
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            secondary_id: None,
        }
    }

    pub fn with_secondary_id(mut self, secondary_id: impl Into<String>) -> Self {
        self.secondary_id = Some(secondary_id.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct PlayerDirectory {
    by_id: HashMap<String, PlayerRecord>,
    /// display name → external id of whoever last carried that name
    by_name: HashMap<String, String>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `record.external_id`.
    ///
    /// Returns the previous record, if any.
    pub fn upsert(&mut self, record: PlayerRecord) -> Option<PlayerRecord> {
        let previous = self.by_id.insert(record.external_id.clone(), record.clone());

        if let Some(prev) = &previous {
            if prev.display_name != record.display_name
                && self.by_name.get(&prev.display_name) == Some(&prev.external_id)
            {
                self.by_name.remove(&prev.display_name);
            }
        }
        self.by_name
            .insert(record.display_name.clone(), record.external_id.clone());

        previous
    }

    pub fn lookup(&self, external_id: &str) -> Option<&PlayerRecord> {
        self.by_id.get(external_id)
    }

    pub fn lookup_by_name(&self, display_name: &str) -> Option<&PlayerRecord> {
        self.by_name
            .get(display_name)
            .and_then(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
