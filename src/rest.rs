#![forbid(unsafe_code)]

//! Chain REST facade.
//!
//! `ChainQuery` is the abstract query surface the rest of the exporter works
//! against; `HttpChainClient` implements it over the Cosmos gRPC-gateway REST
//! API. Every logical query selects an endpoint through the health tracker,
//! fully drains pagination, and on a transport/protocol/decode error marks the
//! endpoint down and retries the whole query once against the next-preferred
//! endpoint before surfacing `EndpointExhausted`. A failure mid-pagination is
//! a whole-query failure: backlog correctness depends on complete sets.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::health::EndpointHealth;

const NODE_INFO_PATH: &str = "/cosmos/base/tendermint/v1beta1/node_info";
const CLIENT_STATES_PATH: &str = "/ibc/core/client/v1/client_states";
const PAGE_LIMIT: u32 = 1000;
const MAX_PAGES: usize = 100;
const ENDPOINT_ATTEMPTS: usize = 2;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("all rest endpoints failed for chain {0}")]
    EndpointExhausted(String),
    #[error("chain {0} is not configured")]
    Unconfigured(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifiedClient {
    pub client_id: String,
    pub counterparty_chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawClientState {
    /// Trusting period as reported on the wire (Go duration string).
    pub trusting_period: String,
    pub counterparty_chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnd {
    pub port_id: String,
    pub channel_id: String,
    pub counterparty_port_id: String,
    pub counterparty_channel_id: String,
}

/// Read-only query surface of one chain's REST API. Safe to share across
/// concurrently polled chains; the only shared mutable state behind an
/// implementation is the endpoint health tracker.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Reachability probe; returns the network id the endpoint reports.
    async fn node_chain_id(&self) -> Result<String, QueryError>;

    async fn identified_clients(&self) -> Result<Vec<IdentifiedClient>, QueryError>;

    async fn client_state(&self, client_id: &str) -> Result<RawClientState, QueryError>;

    /// RFC3339 timestamp of the latest consensus state, when present.
    async fn latest_consensus_timestamp(
        &self,
        client_id: &str,
    ) -> Result<Option<String>, QueryError>;

    /// Connection ids bound to a client; absent client resolves to empty.
    async fn client_connections(&self, client_id: &str) -> Result<Vec<String>, QueryError>;

    async fn connection_counterparty_client(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, QueryError>;

    async fn connection_channels(&self, connection_id: &str)
        -> Result<Vec<ChannelEnd>, QueryError>;

    /// Outstanding SendPacket sequences (commitments not yet acknowledged).
    async fn packet_commitments(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError>;

    /// Acknowledgement sequences written on this chain, not yet cleared.
    async fn packet_acknowledgements(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError>;
}

pub struct HttpChainClient {
    chain_id: String,
    health: Arc<EndpointHealth>,
    http: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(
        chain_id: &str,
        health: Arc<EndpointHealth>,
        request_timeout: Duration,
    ) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| QueryError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            chain_id: chain_id.to_string(),
            health,
            http,
        })
    }

    fn select_endpoint(&self) -> Result<String, QueryError> {
        self.health
            .select(&self.chain_id)
            .map_err(|e| QueryError::Unconfigured(e.0))
    }

    async fn get_value(
        &self,
        endpoint: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, QueryError> {
        let url = join_url(endpoint, path);
        debug!(chain_id = %self.chain_id, %url, "GET");
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueryError::Timeout
                } else {
                    QueryError::Network(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(QueryError::HttpStatus(status.as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| QueryError::Malformed(e.to_string()))
    }

    /// Single-object GET with failover. A 404 is a well-formed "absent"
    /// answer: it passes through without penalizing the endpoint.
    async fn fetch(&self, path: &str) -> Result<Value, QueryError> {
        let mut attempts = 0;
        loop {
            let endpoint = self.select_endpoint()?;
            match self.get_value(&endpoint, path, &[]).await {
                Ok(v) => {
                    self.health.mark_success(&self.chain_id, &endpoint);
                    return Ok(v);
                }
                Err(QueryError::HttpStatus(404)) => {
                    self.health.mark_success(&self.chain_id, &endpoint);
                    return Err(QueryError::HttpStatus(404));
                }
                Err(e) => {
                    warn!(chain_id = %self.chain_id, endpoint = %endpoint, path, error = %e, "rest query failed");
                    self.health.mark_failure(&self.chain_id, &endpoint);
                    attempts += 1;
                    if attempts >= ENDPOINT_ATTEMPTS {
                        return Err(QueryError::EndpointExhausted(self.chain_id.clone()));
                    }
                }
            }
        }
    }

    /// Paginated GET with failover, draining `pagination.next_key` to the end.
    /// Partial pages are discarded on error; the retry starts from scratch on
    /// the next endpoint.
    async fn fetch_paginated(
        &self,
        path: &str,
        field: &'static str,
    ) -> Result<Vec<Value>, QueryError> {
        let mut attempts = 0;
        'endpoints: loop {
            let endpoint = self.select_endpoint()?;
            let mut items = Vec::new();
            let mut next_key: Option<String> = None;
            for _ in 0..MAX_PAGES {
                let mut query: Vec<(&str, String)> =
                    vec![("pagination.limit", PAGE_LIMIT.to_string())];
                if let Some(key) = &next_key {
                    query.push(("pagination.key", key.clone()));
                }
                let value = match self.get_value(&endpoint, path, &query).await {
                    Ok(v) => v,
                    Err(QueryError::HttpStatus(404)) => {
                        self.health.mark_success(&self.chain_id, &endpoint);
                        return Err(QueryError::HttpStatus(404));
                    }
                    Err(e) => {
                        warn!(chain_id = %self.chain_id, endpoint = %endpoint, path, error = %e, "rest query failed");
                        self.health.mark_failure(&self.chain_id, &endpoint);
                        attempts += 1;
                        if attempts >= ENDPOINT_ATTEMPTS {
                            return Err(QueryError::EndpointExhausted(self.chain_id.clone()));
                        }
                        continue 'endpoints;
                    }
                };
                if let Some(page) = value.get(field).and_then(Value::as_array) {
                    items.extend(page.iter().cloned());
                }
                next_key = value
                    .pointer("/pagination/next_key")
                    .and_then(Value::as_str)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string);
                if next_key.is_none() {
                    self.health.mark_success(&self.chain_id, &endpoint);
                    return Ok(items);
                }
            }
            return Err(QueryError::Malformed(format!(
                "pagination for {path} did not terminate within {MAX_PAGES} pages"
            )));
        }
    }
}

#[async_trait]
impl ChainQuery for HttpChainClient {
    async fn node_chain_id(&self) -> Result<String, QueryError> {
        let mut attempts = 0;
        loop {
            let endpoint = self.select_endpoint()?;
            let outcome = self
                .get_value(&endpoint, NODE_INFO_PATH, &[])
                .await
                .and_then(|v| {
                    v.pointer("/default_node_info/network")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            QueryError::Malformed("node_info response missing network id".into())
                        })
                });
            match outcome {
                Ok(network) if network == self.chain_id => {
                    self.health.mark_success(&self.chain_id, &endpoint);
                    return Ok(network);
                }
                Ok(network) => {
                    warn!(
                        expected = %self.chain_id,
                        got = %network,
                        endpoint = %endpoint,
                        "chain id mismatch on rest endpoint"
                    );
                    self.health.mark_failure(&self.chain_id, &endpoint);
                }
                Err(e) => {
                    warn!(chain_id = %self.chain_id, endpoint = %endpoint, error = %e, "node info probe failed");
                    self.health.mark_failure(&self.chain_id, &endpoint);
                }
            }
            attempts += 1;
            if attempts >= ENDPOINT_ATTEMPTS {
                return Err(QueryError::EndpointExhausted(self.chain_id.clone()));
            }
        }
    }

    async fn identified_clients(&self) -> Result<Vec<IdentifiedClient>, QueryError> {
        let items = self.fetch_paginated(CLIENT_STATES_PATH, "client_states").await?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let client_id = item.get("client_id").and_then(Value::as_str);
            let counterparty = item.pointer("/client_state/chain_id").and_then(Value::as_str);
            match (client_id, counterparty) {
                (Some(cid), Some(ccid)) if !cid.is_empty() => out.push(IdentifiedClient {
                    client_id: cid.to_string(),
                    counterparty_chain_id: ccid.to_string(),
                }),
                _ => debug!(chain_id = %self.chain_id, "skipping malformed client state entry"),
            }
        }
        Ok(out)
    }

    async fn client_state(&self, client_id: &str) -> Result<RawClientState, QueryError> {
        let v = self
            .fetch(&format!("/ibc/core/client/v1/client_states/{client_id}"))
            .await?;
        Ok(RawClientState {
            trusting_period: v
                .pointer("/client_state/trusting_period")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            counterparty_chain_id: v
                .pointer("/client_state/chain_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn latest_consensus_timestamp(
        &self,
        client_id: &str,
    ) -> Result<Option<String>, QueryError> {
        let v = match self
            .fetch(&format!("/ibc/core/client/v1/consensus_states/{client_id}"))
            .await
        {
            Ok(v) => v,
            Err(QueryError::HttpStatus(404)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(v.pointer("/consensus_state/timestamp")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn client_connections(&self, client_id: &str) -> Result<Vec<String>, QueryError> {
        match self
            .fetch(&format!("/ibc/core/connection/v1/client_connections/{client_id}"))
            .await
        {
            Ok(v) => Ok(v
                .get("connection_paths")
                .and_then(Value::as_array)
                .map(|paths| {
                    paths
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()),
            Err(QueryError::HttpStatus(404)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn connection_counterparty_client(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, QueryError> {
        match self
            .fetch(&format!("/ibc/core/connection/v1/connections/{connection_id}"))
            .await
        {
            Ok(v) => Ok(v
                .pointer("/connection/counterparty/client_id")
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(QueryError::HttpStatus(404)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn connection_channels(
        &self,
        connection_id: &str,
    ) -> Result<Vec<ChannelEnd>, QueryError> {
        let items = match self
            .fetch_paginated(
                &format!("/ibc/core/channel/v1/connections/{connection_id}/channels"),
                "channels",
            )
            .await
        {
            Ok(items) => items,
            Err(QueryError::HttpStatus(404)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let port_id = item.get("port_id").and_then(Value::as_str);
            let channel_id = item.get("channel_id").and_then(Value::as_str);
            match (port_id, channel_id) {
                (Some(port), Some(channel)) if !channel.is_empty() => out.push(ChannelEnd {
                    port_id: port.to_string(),
                    channel_id: channel.to_string(),
                    counterparty_port_id: item
                        .pointer("/counterparty/port_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    counterparty_channel_id: item
                        .pointer("/counterparty/channel_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
                _ => debug!(chain_id = %self.chain_id, connection_id, "skipping malformed channel entry"),
            }
        }
        Ok(out)
    }

    async fn packet_commitments(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError> {
        let items = self
            .fetch_paginated(
                &format!(
                    "/ibc/core/channel/v1/channels/{channel_id}/ports/{port_id}/packet_commitments"
                ),
                "commitments",
            )
            .await?;
        Ok(parse_sequences(&self.chain_id, items))
    }

    async fn packet_acknowledgements(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Vec<u64>, QueryError> {
        let items = self
            .fetch_paginated(
                &format!(
                    "/ibc/core/channel/v1/channels/{channel_id}/ports/{port_id}/packet_acknowledgements"
                ),
                "acknowledgements",
            )
            .await?;
        Ok(parse_sequences(&self.chain_id, items))
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

// Sequences come over the wire as decimal strings; tolerate plain numbers
// too, and skip entries that carry neither.
fn parse_sequences(chain_id: &str, items: Vec<Value>) -> Vec<u64> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let seq = match item.get("sequence") {
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(Value::Number(n)) => n.as_u64(),
            _ => None,
        };
        match seq {
            Some(s) => out.push(s),
            None => debug!(chain_id, "skipping packet entry without a parsable sequence"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(
            join_url("http://rest.example/", "/ibc/core/x"),
            "http://rest.example/ibc/core/x"
        );
        assert_eq!(
            join_url("http://rest.example", "ibc/core/x"),
            "http://rest.example/ibc/core/x"
        );
    }

    #[test]
    fn parse_sequences_accepts_strings_and_numbers_and_skips_garbage() {
        let items = vec![
            json!({"sequence": "5"}),
            json!({"sequence": 7}),
            json!({"sequence": "not-a-number"}),
            json!({"data": "AA=="}),
        ];
        assert_eq!(parse_sequences("chain-1", items), vec![5, 7]);
    }
}
