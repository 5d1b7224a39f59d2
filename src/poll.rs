#![forbid(unsafe_code)]

//! Per-chain poll scheduling.
//!
//! Each configured chain gets its own loop on a fixed interval. A tick that
//! is still running when the next one is due is skipped, not queued, and a
//! tick that exceeds the configured timeout is abandoned — both bound the
//! concurrency a slow chain can consume. Within a tick, every channel and
//! every tracked client is polled as its own unit; a failing unit keeps its
//! previous snapshot and never aborts its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backlog::{BacklogSnapshot, Direction, PendingSet};
use crate::client_state;
use crate::filter::ExcludedSequences;
use crate::health::EndpointHealth;
use crate::metrics;
use crate::rest::{ChainQuery, QueryError};
use crate::scan::{scan_topology, ChannelPath, ScanFilters, Topology, TrackedClient};
use crate::store::{BacklogKey, ClientKey, SnapshotStore};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub chain_id: String,
    pub poll_interval: Duration,
    pub tick_timeout: Duration,
    pub state_refresh_interval: Duration,
    pub counterparty_chain_ids: Vec<String>,
    /// When non-empty, channel discovery is skipped in favor of this list.
    pub static_channels: Vec<ChannelPath>,
    pub filters: ScanFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    FailedPartial { failed_units: usize },
    Unreachable,
}

pub struct ChainPoller {
    cfg: PollerConfig,
    query: Arc<dyn ChainQuery>,
    health: Arc<EndpointHealth>,
    store: Arc<SnapshotStore>,
    excluded: Arc<ExcludedSequences>,
    topology: Topology,
    last_scan: Option<Instant>,
    pending: Arc<Mutex<HashMap<BacklogKey, PendingSet>>>,
}

impl ChainPoller {
    pub fn new(
        cfg: PollerConfig,
        query: Arc<dyn ChainQuery>,
        health: Arc<EndpointHealth>,
        store: Arc<SnapshotStore>,
        excluded: Arc<ExcludedSequences>,
    ) -> Self {
        let topology = Topology {
            clients: Vec::new(),
            channels: cfg.static_channels.clone(),
        };
        Self {
            cfg,
            query,
            health,
            store,
            excluded,
            topology,
            last_scan: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn scan_due(&self) -> bool {
        self.last_scan
            .map_or(true, |at| at.elapsed() >= self.cfg.state_refresh_interval)
    }

    /// One full refresh cycle for this chain.
    pub async fn tick(&mut self, now_secs: u64) -> TickOutcome {
        if let Err(e) = self.query.node_chain_id().await {
            warn!(
                chain_id = %self.cfg.chain_id,
                error = %e,
                "rest surface unreachable; keeping last known snapshots"
            );
            self.publish_health();
            return TickOutcome::Unreachable;
        }

        let mut failed_units = 0usize;

        if self.scan_due() {
            match scan_topology(
                self.query.as_ref(),
                &self.cfg.counterparty_chain_ids,
                &self.cfg.filters,
            )
            .await
            {
                Ok(mut topology) => {
                    if !self.cfg.static_channels.is_empty() {
                        topology.channels = self.cfg.static_channels.clone();
                    }
                    self.topology = topology;
                    self.last_scan = Some(Instant::now());
                }
                Err(e) => {
                    warn!(
                        chain_id = %self.cfg.chain_id,
                        error = %e,
                        "topology scan failed; reusing cached topology"
                    );
                    failed_units += 1;
                }
            }
        }

        let mut units: JoinSet<Result<(), QueryError>> = JoinSet::new();
        for path in self.topology.channels.clone() {
            let chain_id = self.cfg.chain_id.clone();
            let query = Arc::clone(&self.query);
            let store = Arc::clone(&self.store);
            let excluded = Arc::clone(&self.excluded);
            let pending = Arc::clone(&self.pending);
            units.spawn(async move {
                poll_channel(chain_id, path, query, store, excluded, pending, now_secs).await
            });
        }
        for client in self.topology.clients.clone() {
            let chain_id = self.cfg.chain_id.clone();
            let query = Arc::clone(&self.query);
            let store = Arc::clone(&self.store);
            units.spawn(async move { poll_client(chain_id, client, query, store, now_secs).await });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) => failed_units += 1,
                Err(e) => {
                    failed_units += 1;
                    warn!(chain_id = %self.cfg.chain_id, error = %e, "poll unit aborted");
                }
            }
        }

        self.publish_health();

        if failed_units == 0 {
            metrics::BACKLOG_LAST_UPDATE
                .with_label_values(&[self.cfg.chain_id.as_str()])
                .set(gauge_i64(now_secs));
            self.store.record_tick(&self.cfg.chain_id, now_secs);
            TickOutcome::Published
        } else {
            TickOutcome::FailedPartial { failed_units }
        }
    }

    fn publish_health(&self) {
        for snap in self.health.snapshot() {
            if snap.chain_id != self.cfg.chain_id {
                continue;
            }
            metrics::REST_HEALTH
                .with_label_values(&[snap.chain_id.as_str(), snap.endpoint.as_str()])
                .set(i64::from(snap.status.is_up()));
        }
    }
}

pub fn spawn(poller: ChainPoller, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(run_poll_loop(poller, shutdown))
}

async fn run_poll_loop(mut poller: ChainPoller, shutdown: Arc<AtomicBool>) {
    let mut ticker = interval(poller.cfg.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let tick_timeout = poller.cfg.tick_timeout;
    info!(
        chain_id = %poller.cfg.chain_id,
        interval_secs = poller.cfg.poll_interval.as_secs(),
        "starting chain poller"
    );
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            info!(chain_id = %poller.cfg.chain_id, "chain poller shutting down");
            break;
        }
        let chain_id = poller.cfg.chain_id.clone();
        match timeout(tick_timeout, poller.tick(crate::unix_now_secs())).await {
            Ok(TickOutcome::Published) => debug!(chain_id = %chain_id, "tick published"),
            Ok(TickOutcome::FailedPartial { failed_units }) => {
                warn!(chain_id = %chain_id, failed_units, "tick completed with partial failures");
            }
            Ok(TickOutcome::Unreachable) => {}
            Err(_) => warn!(
                chain_id = %chain_id,
                timeout_secs = tick_timeout.as_secs(),
                "tick exceeded timeout; abandoned"
            ),
        }
    }
}

/// Poll both packet directions of one channel and publish their snapshots.
/// A failed direction keeps its previous snapshot; the other direction still
/// publishes.
async fn poll_channel(
    chain_id: String,
    path: ChannelPath,
    query: Arc<dyn ChainQuery>,
    store: Arc<SnapshotStore>,
    excluded: Arc<ExcludedSequences>,
    pending: Arc<Mutex<HashMap<BacklogKey, PendingSet>>>,
    now_secs: u64,
) -> Result<(), QueryError> {
    let mut first_error = None;
    for direction in [Direction::Send, Direction::Ack] {
        let observed = match direction {
            Direction::Send => query.packet_commitments(&path.port_id, &path.channel_id).await,
            Direction::Ack => {
                query
                    .packet_acknowledgements(&path.port_id, &path.channel_id)
                    .await
            }
        };
        let observed = match observed {
            Ok(sequences) => excluded.retain(&path.channel_id, sequences),
            Err(e) => {
                warn!(
                    chain_id = %chain_id,
                    port_id = %path.port_id,
                    channel_id = %path.channel_id,
                    direction = direction.as_str(),
                    error = %e,
                    "packet query failed; keeping last snapshot"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
                continue;
            }
        };

        let key = BacklogKey {
            chain_id: chain_id.clone(),
            connection_id: path.connection_id.clone(),
            port_id: path.port_id.clone(),
            channel_id: path.channel_id.clone(),
            direction,
        };
        let snapshot = {
            let mut map = pending.lock().unwrap();
            map.entry(key.clone()).or_default().reconcile(&observed, now_secs)
        };
        debug!(
            chain_id = %chain_id,
            channel_id = %path.channel_id,
            direction = direction.as_str(),
            size = snapshot.size,
            oldest_sequence = snapshot.oldest_sequence.unwrap_or(0),
            "backlog reconciled"
        );
        publish_backlog_gauges(&chain_id, &path, direction, &snapshot);
        store.publish_backlog(key, &path, snapshot, now_secs);
    }
    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

async fn poll_client(
    chain_id: String,
    tracked: TrackedClient,
    query: Arc<dyn ChainQuery>,
    store: Arc<SnapshotStore>,
    now_secs: u64,
) -> Result<(), QueryError> {
    let state = match client_state::refresh(query.as_ref(), &tracked.client_id, now_secs).await {
        Ok(state) => state,
        Err(e) => {
            warn!(
                chain_id = %chain_id,
                client_id = %tracked.client_id,
                error = %e,
                "client state refresh failed; keeping last snapshot"
            );
            return Err(e);
        }
    };

    let labels = [
        tracked.client_id.as_str(),
        chain_id.as_str(),
        state.counterparty_chain_id.as_str(),
        tracked.counterparty_client_id.as_str(),
    ];
    metrics::CLIENT_TRUSTING_PERIOD
        .with_label_values(&labels)
        .set(gauge_i64(state.trusting_period_secs));
    metrics::CLIENT_LAST_UPDATE
        .with_label_values(&labels)
        .set(gauge_i64(state.last_update_timestamp));

    store.publish_client(
        ClientKey {
            chain_id,
            client_id: tracked.client_id,
        },
        state,
        tracked.counterparty_client_id,
        now_secs,
    );
    Ok(())
}

fn publish_backlog_gauges(
    chain_id: &str,
    path: &ChannelPath,
    direction: Direction,
    snapshot: &BacklogSnapshot,
) {
    let labels = [
        chain_id,
        path.connection_id.as_str(),
        path.port_id.as_str(),
        path.channel_id.as_str(),
        path.counterparty_chain_id.as_str(),
        path.counterparty_port_id.as_str(),
        path.counterparty_channel_id.as_str(),
    ];
    let oldest_sequence = gauge_i64(snapshot.oldest_sequence.unwrap_or(0));
    let oldest_timestamp = gauge_i64(snapshot.oldest_timestamp.unwrap_or(0));
    match direction {
        Direction::Send => {
            metrics::SEND_BACKLOG_SIZE
                .with_label_values(&labels)
                .set(gauge_i64(snapshot.size));
            metrics::SEND_BACKLOG_OLDEST_SEQUENCE
                .with_label_values(&labels)
                .set(oldest_sequence);
            metrics::SEND_BACKLOG_OLDEST_TIMESTAMP
                .with_label_values(&labels)
                .set(oldest_timestamp);
        }
        Direction::Ack => {
            metrics::ACK_BACKLOG_OLDEST_SEQUENCE
                .with_label_values(&labels)
                .set(oldest_sequence);
            metrics::ACK_BACKLOG_OLDEST_TIMESTAMP
                .with_label_values(&labels)
                .set(oldest_timestamp);
        }
    }
}

fn gauge_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
