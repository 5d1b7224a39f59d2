#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::time::Instant;

static START: Lazy<Instant> = Lazy::new(Instant::now);

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub const CHANNEL_LABELS: &[&str] = &[
    "chain_id",
    "connection_id",
    "port_id",
    "channel_id",
    "counterparty_chain_id",
    "counterparty_port_id",
    "counterparty_channel_id",
];

pub const CLIENT_LABELS: &[&str] = &[
    "client_id",
    "chain_id",
    "counterparty_chain_id",
    "counterparty_client_id",
];

pub static REST_HEALTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_rest_health",
            "Health status of IBC REST endpoint (1=up, 0=down)",
        ),
        &["chain_id", "endpoint"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static CLIENT_TRUSTING_PERIOD: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_client_trusting_period_seconds",
            "Trusting period for IBC client",
        ),
        CLIENT_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static CLIENT_LAST_UPDATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_client_last_update_timestamp_seconds",
            "Last consensus state update time",
        ),
        CLIENT_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static SEND_BACKLOG_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_send_packet_backlog_size",
            "Total SendPacket events backlog",
        ),
        CHANNEL_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static SEND_BACKLOG_OLDEST_SEQUENCE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_send_packet_backlog_oldest_sequence",
            "Oldest SendPacket sequence",
        ),
        CHANNEL_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static SEND_BACKLOG_OLDEST_TIMESTAMP: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_send_packet_backlog_oldest_timestamp_seconds",
            "Timestamp of oldest SendPacket in backlog",
        ),
        CHANNEL_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static ACK_BACKLOG_OLDEST_SEQUENCE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_ack_packet_backlog_oldest_sequence",
            "Oldest AcknowledgementPacket sequence",
        ),
        CHANNEL_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static ACK_BACKLOG_OLDEST_TIMESTAMP: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_ack_packet_backlog_oldest_timestamp_seconds",
            "Timestamp of oldest AcknowledgementPacket in backlog",
        ),
        CHANNEL_LABELS,
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static BACKLOG_LAST_UPDATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "ibc_backlog_last_update_time_seconds",
            "Last update time for backlog metrics",
        ),
        &["chain_id"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static PROCESS_UPTIME_SECONDS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::with_opts(Opts::new(
        "process_uptime_seconds",
        "Process uptime in seconds",
    ))
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub fn gather_text() -> String {
    let uptime = i64::try_from(START.elapsed().as_secs()).unwrap_or(i64::MAX);
    PROCESS_UPTIME_SECONDS.set(uptime);
    let mf = REGISTRY.gather();
    let mut out = Vec::new();
    TextEncoder::new().encode(&mf, &mut out).expect("encode");
    String::from_utf8(out).unwrap_or_default()
}
