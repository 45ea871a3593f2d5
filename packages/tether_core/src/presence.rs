//! PresenceReconciler: turns periodic full player snapshots into
//! connect/disconnect events.
//!
//! The first poll after start only records the baseline, so players already
//! online at boot are not reported as a flood of connects. A player who
//! leaves and rejoins between two polls is invisible; snapshot diffing cannot
//! resolve anything finer than the poll interval.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use crate::directory::{PlayerDirectory, PlayerRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "player", rename_all = "camelCase")]
pub enum PresenceEvent {
    PlayerConnected(PlayerRecord),
    PlayerDisconnected(PlayerRecord),
}

impl PresenceEvent {
    /// Event name on the control channel.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayerConnected(_) => "playerConnected",
            Self::PlayerDisconnected(_) => "playerDisconnected",
        }
    }

    pub fn player(&self) -> &PlayerRecord {
        match self {
            Self::PlayerConnected(p) | Self::PlayerDisconnected(p) => p,
        }
    }
}

/// Raw set difference between two consecutive snapshots, by external id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceDiff {
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
}

impl PresenceDiff {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PresenceReconciler {
    /// `None` until the first poll has been recorded.
    last_known: Option<BTreeSet<String>>,
}

impl PresenceReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_known(&self) -> Option<&BTreeSet<String>> {
        self.last_known.as_ref()
    }

    /// Replace the known set with `current` and return what changed.
    ///
    /// Always empty on the first call.
    pub fn diff(&mut self, current: BTreeSet<String>) -> PresenceDiff {
        let diff = match &self.last_known {
            None => PresenceDiff::default(),
            Some(last) => PresenceDiff {
                connected: current.difference(last).cloned().collect(),
                disconnected: last.difference(&current).cloned().collect(),
            },
        };
        self.last_known = Some(current);
        diff
    }

    /// Record a snapshot into `directory`, diff it, and enrich the result.
    ///
    /// Every snapshot row is upserted before diffing so connects resolve.
    /// Ids the directory cannot resolve are dropped with a warning rather
    /// than emitted with a partial identity.
    pub fn reconcile(
        &mut self,
        snapshot: &[PlayerRecord],
        directory: &mut PlayerDirectory,
    ) -> Vec<PresenceEvent> {
        for record in snapshot {
            directory.upsert(record.clone());
        }
        let current = snapshot.iter().map(|r| r.external_id.clone()).collect();
        let diff = self.diff(current);

        let connected = diff.connected.iter().filter_map(|id| {
            resolve(directory, id, "connect").map(PresenceEvent::PlayerConnected)
        });
        let disconnected = diff.disconnected.iter().filter_map(|id| {
            resolve(directory, id, "disconnect").map(PresenceEvent::PlayerDisconnected)
        });
        connected.chain(disconnected).collect()
    }
}

fn resolve(directory: &PlayerDirectory, id: &str, kind: &str) -> Option<PlayerRecord> {
    let record = directory.lookup(id).cloned();
    if record.is_none() {
        warn!(external_id = %id, kind, "dropping presence event for unknown player");
    }
    record
}
