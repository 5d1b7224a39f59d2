//! HTTP-level facade tests: endpoint failover, health marking, and
//! pagination draining against real local servers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use ibc_exporter::filter::ExcludedSequences;
use ibc_exporter::health::EndpointHealth;
use ibc_exporter::metrics;
use ibc_exporter::poll::{ChainPoller, PollerConfig, TickOutcome};
use ibc_exporter::rest::{ChainQuery, HttpChainClient, QueryError};
use ibc_exporter::scan::ScanFilters;
use ibc_exporter::store::SnapshotStore;

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on: connections are refused immediately.
async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn rest_app(network: &'static str) -> Router {
    Router::new()
        .route(
            "/cosmos/base/tendermint/v1beta1/node_info",
            get(move || async move { Json(json!({"default_node_info": {"network": network}})) }),
        )
        .route(
            "/ibc/core/client/v1/client_states",
            get(|| async {
                Json(json!({"client_states": [], "pagination": {"next_key": null}}))
            }),
        )
        .route(
            "/ibc/core/channel/v1/channels/channel-0/ports/transfer/packet_commitments",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                if params.contains_key("pagination.key") {
                    Json(json!({
                        "commitments": [{"sequence": "9"}],
                        "pagination": {"next_key": null}
                    }))
                } else {
                    Json(json!({
                        "commitments": [{"sequence": "3"}],
                        "pagination": {"next_key": "bmV4dA=="}
                    }))
                }
            }),
        )
        .route(
            "/ibc/core/channel/v1/channels/channel-0/ports/transfer/packet_acknowledgements",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                // The second page always fails, so the query can never
                // complete against this endpoint.
                if params.contains_key("pagination.key") {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    Json(json!({
                        "acknowledgements": [{"sequence": "1"}],
                        "pagination": {"next_key": "bQ=="}
                    }))
                    .into_response()
                }
            }),
        )
}

#[tokio::test]
async fn failover_skips_dead_endpoint_and_tick_succeeds() {
    let dead = dead_endpoint().await;
    let live_addr = spawn_server(rest_app("testchain-1")).await;
    let live = format!("http://{live_addr}");

    let health = Arc::new(EndpointHealth::new([(
        "testchain-1".to_string(),
        vec![dead.clone(), live.clone()],
    )]));
    let query: Arc<dyn ChainQuery> = Arc::new(
        HttpChainClient::new("testchain-1", Arc::clone(&health), Duration::from_secs(2)).unwrap(),
    );
    let store = Arc::new(SnapshotStore::new(vec!["testchain-1".to_string()]));
    let mut poller = ChainPoller::new(
        PollerConfig {
            chain_id: "testchain-1".to_string(),
            poll_interval: Duration::from_secs(30),
            tick_timeout: Duration::from_secs(10),
            state_refresh_interval: Duration::from_secs(3600),
            counterparty_chain_ids: vec!["cp-1".to_string()],
            static_channels: Vec::new(),
            filters: ScanFilters::default(),
        },
        query,
        Arc::clone(&health),
        Arc::clone(&store),
        Arc::new(ExcludedSequences::default()),
    );

    // The preferred endpoint is dead; the probe fails over and the poll is
    // still treated as successful.
    assert_eq!(poller.tick(1_000).await, TickOutcome::Published);
    assert_eq!(store.last_tick("testchain-1"), Some(1_000));

    assert_eq!(
        metrics::REST_HEALTH
            .with_label_values(&["testchain-1", dead.as_str()])
            .get(),
        0
    );
    assert_eq!(
        metrics::REST_HEALTH
            .with_label_values(&["testchain-1", live.as_str()])
            .get(),
        1
    );
}

#[tokio::test]
async fn pagination_is_drained_to_the_last_page() {
    let live_addr = spawn_server(rest_app("pagechain-1")).await;
    let live = format!("http://{live_addr}");

    let health = Arc::new(EndpointHealth::new([(
        "pagechain-1".to_string(),
        vec![live],
    )]));
    let client =
        HttpChainClient::new("pagechain-1", health, Duration::from_secs(2)).unwrap();

    let sequences = client.packet_commitments("transfer", "channel-0").await.unwrap();
    assert_eq!(sequences, vec![3, 9]);
}

#[tokio::test]
async fn mid_pagination_failure_is_a_whole_query_failure() {
    let live_addr = spawn_server(rest_app("pagechain-2")).await;
    let live = format!("http://{live_addr}");

    let health = Arc::new(EndpointHealth::new([(
        "pagechain-2".to_string(),
        vec![live],
    )]));
    let client =
        HttpChainClient::new("pagechain-2", health, Duration::from_secs(2)).unwrap();

    let err = client
        .packet_acknowledgements("transfer", "channel-0")
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::EndpointExhausted(_)));
}

#[tokio::test]
async fn chain_id_mismatch_is_an_endpoint_fault() {
    let live_addr = spawn_server(rest_app("otherchain-1")).await;
    let live = format!("http://{live_addr}");

    let health = Arc::new(EndpointHealth::new([(
        "expectedchain-1".to_string(),
        vec![live.clone()],
    )]));
    let client = HttpChainClient::new("expectedchain-1", Arc::clone(&health), Duration::from_secs(2))
        .unwrap();

    let err = client.node_chain_id().await.unwrap_err();
    assert!(matches!(err, QueryError::EndpointExhausted(_)));
    let snap = health.snapshot();
    let slot = snap.iter().find(|s| s.endpoint == live).unwrap();
    assert!(!slot.status.is_up());
}
