#![forbid(unsafe_code)]

//! IBC topology discovery: clients, their connections, and the channels
//! riding on them, resolved against the set of counterparty chains this
//! process monitors. The result is treated as static between refreshes.

use serde::Deserialize;
use tracing::{debug, info};

use crate::filter::NameFilter;
use crate::rest::{ChainQuery, QueryError};

/// One monitored IBC path on a chain, with its counterparty identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ChannelPath {
    pub connection_id: String,
    pub port_id: String,
    pub channel_id: String,
    pub counterparty_chain_id: String,
    pub counterparty_port_id: String,
    pub counterparty_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedClient {
    pub client_id: String,
    pub counterparty_chain_id: String,
    pub counterparty_client_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub clients: Vec<TrackedClient>,
    pub channels: Vec<ChannelPath>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    pub clients: NameFilter,
    pub connections: NameFilter,
    pub channels: NameFilter,
}

/// Walk the chain's client/connection/channel graph. Clients pointing at
/// chains outside `counterparty_chain_ids` are skipped, as are clients with
/// no connections. Channel filters match on `port/channel`.
pub async fn scan_topology(
    query: &dyn ChainQuery,
    counterparty_chain_ids: &[String],
    filters: &ScanFilters,
) -> Result<Topology, QueryError> {
    let all_clients = query.identified_clients().await?;
    let mut clients = Vec::new();
    let mut channels = Vec::new();

    for client in all_clients {
        if !counterparty_chain_ids.contains(&client.counterparty_chain_id) {
            debug!(
                client_id = %client.client_id,
                counterparty = %client.counterparty_chain_id,
                "skipping client for unmonitored counterparty"
            );
            continue;
        }
        if !filters.clients.admits(&client.client_id) {
            continue;
        }

        let connections = query.client_connections(&client.client_id).await?;
        if connections.is_empty() {
            debug!(client_id = %client.client_id, "no connections found for client");
            continue;
        }

        let counterparty_client_id = query
            .connection_counterparty_client(&connections[0])
            .await?
            .unwrap_or_default();
        clients.push(TrackedClient {
            client_id: client.client_id.clone(),
            counterparty_chain_id: client.counterparty_chain_id.clone(),
            counterparty_client_id,
        });

        for connection_id in connections {
            if !filters.connections.admits(&connection_id) {
                continue;
            }
            for end in query.connection_channels(&connection_id).await? {
                let path = format!("{}/{}", end.port_id, end.channel_id);
                if !filters.channels.admits(&path) {
                    continue;
                }
                channels.push(ChannelPath {
                    connection_id: connection_id.clone(),
                    port_id: end.port_id,
                    channel_id: end.channel_id,
                    counterparty_chain_id: client.counterparty_chain_id.clone(),
                    counterparty_port_id: end.counterparty_port_id,
                    counterparty_channel_id: end.counterparty_channel_id,
                });
            }
        }
    }

    info!(
        clients = clients.len(),
        channels = channels.len(),
        "ibc topology scan complete"
    );
    Ok(Topology { clients, channels })
}
