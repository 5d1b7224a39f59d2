#![forbid(unsafe_code)]

//! Published snapshot store.
//!
//! The latest-known-good values, replaced whole per key on successful refresh
//! and left untouched on failure. Readers (the HTTP status/readiness path)
//! only ever see a complete snapshot for any key.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::backlog::{BacklogSnapshot, Direction};
use crate::client_state::ClientState;
use crate::scan::ChannelPath;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BacklogKey {
    pub chain_id: String,
    pub connection_id: String,
    pub port_id: String,
    pub channel_id: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub chain_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBacklog {
    pub path: ChannelPath,
    pub snapshot: BacklogSnapshot,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredClient {
    pub state: ClientState,
    pub counterparty_client_id: String,
    pub updated_at: u64,
}

#[derive(Debug, Serialize)]
pub struct ChainStatus {
    pub chain_id: String,
    pub last_update: Option<u64>,
    pub tracked_channels: usize,
    pub tracked_clients: usize,
    pub send_backlog_total: u64,
}

#[derive(Debug)]
pub struct SnapshotStore {
    chain_ids: Vec<String>,
    backlogs: RwLock<HashMap<BacklogKey, StoredBacklog>>,
    clients: RwLock<HashMap<ClientKey, StoredClient>>,
    ticks: RwLock<HashMap<String, u64>>,
}

impl SnapshotStore {
    pub fn new(chain_ids: Vec<String>) -> Self {
        Self {
            chain_ids,
            backlogs: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            ticks: RwLock::new(HashMap::new()),
        }
    }

    pub fn publish_backlog(
        &self,
        key: BacklogKey,
        path: &ChannelPath,
        snapshot: BacklogSnapshot,
        now_secs: u64,
    ) {
        self.backlogs.write().unwrap().insert(
            key,
            StoredBacklog {
                path: path.clone(),
                snapshot,
                updated_at: now_secs,
            },
        );
    }

    pub fn backlog(&self, key: &BacklogKey) -> Option<StoredBacklog> {
        self.backlogs.read().unwrap().get(key).cloned()
    }

    pub fn publish_client(
        &self,
        key: ClientKey,
        state: ClientState,
        counterparty_client_id: String,
        now_secs: u64,
    ) {
        self.clients.write().unwrap().insert(
            key,
            StoredClient {
                state,
                counterparty_client_id,
                updated_at: now_secs,
            },
        );
    }

    pub fn client(&self, key: &ClientKey) -> Option<StoredClient> {
        self.clients.read().unwrap().get(key).cloned()
    }

    pub fn record_tick(&self, chain_id: &str, now_secs: u64) {
        self.ticks
            .write()
            .unwrap()
            .insert(chain_id.to_string(), now_secs);
    }

    pub fn last_tick(&self, chain_id: &str) -> Option<u64> {
        self.ticks.read().unwrap().get(chain_id).copied()
    }

    /// True once any chain has published a full tick; drives readiness.
    pub fn any_tick(&self) -> bool {
        !self.ticks.read().unwrap().is_empty()
    }

    pub fn status_summary(&self) -> Vec<ChainStatus> {
        let backlogs = self.backlogs.read().unwrap();
        let clients = self.clients.read().unwrap();
        let ticks = self.ticks.read().unwrap();
        self.chain_ids
            .iter()
            .map(|chain_id| {
                let tracked_channels = backlogs
                    .keys()
                    .filter(|k| k.chain_id == *chain_id && k.direction == Direction::Send)
                    .count();
                let send_backlog_total = backlogs
                    .iter()
                    .filter(|(k, _)| k.chain_id == *chain_id && k.direction == Direction::Send)
                    .map(|(_, stored)| stored.snapshot.size)
                    .sum();
                let tracked_clients = clients.keys().filter(|k| k.chain_id == *chain_id).count();
                ChainStatus {
                    chain_id: chain_id.clone(),
                    last_update: ticks.get(chain_id).copied(),
                    tracked_channels,
                    tracked_clients,
                    send_backlog_total,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> ChannelPath {
        ChannelPath {
            connection_id: "connection-1".to_string(),
            port_id: "transfer".to_string(),
            channel_id: "channel-0".to_string(),
            counterparty_chain_id: "cp-1".to_string(),
            counterparty_port_id: "transfer".to_string(),
            counterparty_channel_id: "channel-9".to_string(),
        }
    }

    fn key(direction: Direction) -> BacklogKey {
        BacklogKey {
            chain_id: "chain-1".to_string(),
            connection_id: "connection-1".to_string(),
            port_id: "transfer".to_string(),
            channel_id: "channel-0".to_string(),
            direction,
        }
    }

    #[test]
    fn replaces_backlog_snapshots_whole() {
        let store = SnapshotStore::new(vec!["chain-1".to_string()]);
        let snap = BacklogSnapshot {
            size: 2,
            oldest_sequence: Some(5),
            oldest_timestamp: Some(100),
        };
        store.publish_backlog(key(Direction::Send), &path(), snap.clone(), 100);
        assert_eq!(store.backlog(&key(Direction::Send)).unwrap().snapshot, snap);
        assert_eq!(store.backlog(&key(Direction::Ack)), None);

        let next = BacklogSnapshot {
            size: 1,
            oldest_sequence: Some(7),
            oldest_timestamp: Some(140),
        };
        store.publish_backlog(key(Direction::Send), &path(), next.clone(), 140);
        let stored = store.backlog(&key(Direction::Send)).unwrap();
        assert_eq!(stored.snapshot, next);
        assert_eq!(stored.updated_at, 140);
    }

    #[test]
    fn readiness_flips_after_first_recorded_tick() {
        let store = SnapshotStore::new(vec!["chain-1".to_string()]);
        assert!(!store.any_tick());
        assert_eq!(store.last_tick("chain-1"), None);
        store.record_tick("chain-1", 100);
        assert!(store.any_tick());
        assert_eq!(store.last_tick("chain-1"), Some(100));
    }

    #[test]
    fn status_summary_counts_send_side_only() {
        let store = SnapshotStore::new(vec!["chain-1".to_string()]);
        store.publish_backlog(
            key(Direction::Send),
            &path(),
            BacklogSnapshot {
                size: 3,
                oldest_sequence: Some(1),
                oldest_timestamp: Some(50),
            },
            100,
        );
        store.publish_backlog(
            key(Direction::Ack),
            &path(),
            BacklogSnapshot {
                size: 9,
                oldest_sequence: Some(2),
                oldest_timestamp: Some(60),
            },
            100,
        );
        let summary = store.status_summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].tracked_channels, 1);
        assert_eq!(summary[0].send_backlog_total, 3);
    }
}
