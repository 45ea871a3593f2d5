use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lock;

/// Append-only queue drained in full by each consumer poll.
#[derive(Debug)]
pub struct FireAndForgetQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for FireAndForgetQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T> FireAndForgetQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Returns the queue length after the push.
    pub fn push(&self, item: T) -> usize {
        let mut items = lock(&self.items);
        items.push(item);
        items.len()
    }

    /// Atomically take every queued item, leaving the queue empty.
    pub fn pop_all(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.items))
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a teleport should land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TeleportTarget {
    Player {
        #[serde(rename = "targetPlayerId")]
        target_player_id: String,
    },
    Coordinates { x: f64, y: f64, z: f64 },
}

/// A movement command for the polling script to apply on its next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleportCommand {
    pub subject_id: String,
    #[serde(flatten)]
    pub target: TeleportTarget,
    pub timestamp: DateTime<Utc>,
}

impl TeleportCommand {
    pub fn new(subject_id: impl Into<String>, target: TeleportTarget) -> Self {
        Self {
            subject_id: subject_id.into(),
            target,
            timestamp: Utc::now(),
        }
    }
}
