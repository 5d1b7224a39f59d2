#![forbid(unsafe_code)]

//! Deterministic in-memory `ChainQuery` implementation for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::rest::{ChainQuery, ChannelEnd, IdentifiedClient, QueryError, RawClientState};

#[derive(Default)]
pub struct MockChainQuery {
    chain_id: String,
    clients: Vec<IdentifiedClient>,
    client_states: HashMap<String, RawClientState>,
    consensus_timestamps: HashMap<String, String>,
    connections: HashMap<String, Vec<String>>,
    counterparty_clients: HashMap<String, String>,
    channels: HashMap<String, Vec<ChannelEnd>>,
    commitments: Mutex<HashMap<(String, String), Vec<u64>>>,
    acknowledgements: Mutex<HashMap<(String, String), Vec<u64>>>,
    failing_channels: Mutex<HashSet<(String, String)>>,
    fail_all: AtomicBool,
    packet_delay: Mutex<Option<Duration>>,
}

impl MockChainQuery {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_client(
        mut self,
        client_id: &str,
        counterparty_chain_id: &str,
        trusting_period: &str,
        consensus_timestamp: &str,
    ) -> Self {
        self.clients.push(IdentifiedClient {
            client_id: client_id.to_string(),
            counterparty_chain_id: counterparty_chain_id.to_string(),
        });
        self.client_states.insert(
            client_id.to_string(),
            RawClientState {
                trusting_period: trusting_period.to_string(),
                counterparty_chain_id: counterparty_chain_id.to_string(),
            },
        );
        self.consensus_timestamps
            .insert(client_id.to_string(), consensus_timestamp.to_string());
        self
    }

    pub fn with_connection(
        mut self,
        client_id: &str,
        connection_id: &str,
        counterparty_client_id: &str,
    ) -> Self {
        self.connections
            .entry(client_id.to_string())
            .or_default()
            .push(connection_id.to_string());
        self.counterparty_clients
            .insert(connection_id.to_string(), counterparty_client_id.to_string());
        self
    }

    pub fn with_channel(mut self, connection_id: &str, end: ChannelEnd) -> Self {
        self.channels
            .entry(connection_id.to_string())
            .or_default()
            .push(end);
        self
    }

    pub fn set_commitments(&self, port_id: &str, channel_id: &str, sequences: Vec<u64>) {
        self.commitments
            .lock()
            .unwrap()
            .insert((port_id.to_string(), channel_id.to_string()), sequences);
    }

    pub fn set_acknowledgements(&self, port_id: &str, channel_id: &str, sequences: Vec<u64>) {
        self.acknowledgements
            .lock()
            .unwrap()
            .insert((port_id.to_string(), channel_id.to_string()), sequences);
    }

    /// Make packet queries for one channel fail until cleared.
    pub fn fail_channel(&self, port_id: &str, channel_id: &str, failing: bool) {
        let key = (port_id.to_string(), channel_id.to_string());
        let mut set = self.failing_channels.lock().unwrap();
        if failing {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Make every query fail, as if the chain's REST surface were dark.
    pub fn fail_everything(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::Relaxed);
    }

    /// Delay packet queries, to exercise tick timeouts and isolation.
    pub fn set_packet_delay(&self, delay: Option<Duration>) {
        *self.packet_delay.lock().unwrap() = delay;
    }

    fn check_up(&self) -> Result<(), QueryError> {
        if self.fail_all.load(Ordering::Relaxed) {
            return Err(QueryError::Network("injected failure".to_string()));
        }
        Ok(())
    }

    async fn packet_query(
        &self,
        table: &Mutex<HashMap<(String, String), Vec<u64>>>,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError> {
        self.check_up()?;
        let delay = *self.packet_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = (port_id.to_string(), channel_id.to_string());
        if self.failing_channels.lock().unwrap().contains(&key) {
            return Err(QueryError::Network("injected channel failure".to_string()));
        }
        Ok(table.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ChainQuery for MockChainQuery {
    async fn node_chain_id(&self) -> Result<String, QueryError> {
        self.check_up()?;
        Ok(self.chain_id.clone())
    }

    async fn identified_clients(&self) -> Result<Vec<IdentifiedClient>, QueryError> {
        self.check_up()?;
        Ok(self.clients.clone())
    }

    async fn client_state(&self, client_id: &str) -> Result<RawClientState, QueryError> {
        self.check_up()?;
        self.client_states
            .get(client_id)
            .cloned()
            .ok_or(QueryError::HttpStatus(404))
    }

    async fn latest_consensus_timestamp(
        &self,
        client_id: &str,
    ) -> Result<Option<String>, QueryError> {
        self.check_up()?;
        Ok(self.consensus_timestamps.get(client_id).cloned())
    }

    async fn client_connections(&self, client_id: &str) -> Result<Vec<String>, QueryError> {
        self.check_up()?;
        Ok(self.connections.get(client_id).cloned().unwrap_or_default())
    }

    async fn connection_counterparty_client(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, QueryError> {
        self.check_up()?;
        Ok(self.counterparty_clients.get(connection_id).cloned())
    }

    async fn connection_channels(
        &self,
        connection_id: &str,
    ) -> Result<Vec<ChannelEnd>, QueryError> {
        self.check_up()?;
        Ok(self.channels.get(connection_id).cloned().unwrap_or_default())
    }

    async fn packet_commitments(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError> {
        self.packet_query(&self.commitments, port_id, channel_id).await
    }

    async fn packet_acknowledgements(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError> {
        self.packet_query(&self.acknowledgements, port_id, channel_id)
            .await
    }
}
