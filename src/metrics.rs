//! Prometheus metrics collection for palaverd.
//!
//! Tracks connection churn, pipeline throughput, policy enforcement, and
//! degraded-mode events. Exposed on the auxiliary HTTP surface at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Messages accepted and persisted.
    pub static ref MESSAGES_PERSISTED: IntCounter = IntCounter::new(
        "chat_messages_persisted_total",
        "Messages accepted and persisted"
    ).unwrap();

    /// Events fanned out to subscribers.
    pub static ref EVENTS_BROADCAST: IntCounter = IntCounter::new(
        "chat_events_broadcast_total",
        "Events delivered to subscriber queues"
    ).unwrap();

    /// Broadcast deliveries dropped because a subscriber queue was full.
    pub static ref BROADCAST_DROPS: IntCounter = IntCounter::new(
        "chat_broadcast_drops_total",
        "Per-subscriber deliveries dropped on a full queue"
    ).unwrap();

    /// Messages refused by the moderation pipeline.
    pub static ref MODERATION_BLOCKED: IntCounter = IntCounter::new(
        "chat_moderation_blocked_total",
        "Messages blocked by moderation"
    ).unwrap();

    /// Messages flagged by the moderation pipeline.
    pub static ref MODERATION_FLAGGED: IntCounter = IntCounter::new(
        "chat_moderation_flagged_total",
        "Messages flagged by moderation"
    ).unwrap();

    /// External moderation calls that timed out or failed (degraded mode).
    pub static ref MODERATION_DEGRADED: IntCounter = IntCounter::new(
        "chat_moderation_degraded_total",
        "External moderation timeouts treated as allow"
    ).unwrap();

    /// Commands refused by rate limiting.
    pub static ref RATE_LIMITED: IntCounter = IntCounter::new(
        "chat_rate_limited_total",
        "Rate limit hits"
    ).unwrap();

    /// Commands refused by the permission oracle.
    pub static ref PERMISSION_DENIED: IntCounter = IntCounter::new(
        "chat_permission_denied_total",
        "Permission denials"
    ).unwrap();

    /// Connections closed for falling behind their outbound queue.
    pub static ref SLOW_CONSUMER_CLOSES: IntCounter = IntCounter::new(
        "chat_slow_consumer_closes_total",
        "Connections closed as slow consumers"
    ).unwrap();

    /// Handshakes refused for bad credentials.
    pub static ref AUTH_FAILURES: IntCounter = IntCounter::new(
        "chat_auth_failures_total",
        "Failed connection handshakes"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently open client connections.
    pub static ref OPEN_CONNECTIONS: IntGauge = IntGauge::new(
        "chat_open_connections",
        "Currently open client connections"
    ).unwrap();

    /// Principals with at least one open connection.
    pub static ref ONLINE_PRINCIPALS: IntGauge = IntGauge::new(
        "chat_online_principals",
        "Principals currently online"
    ).unwrap();

    /// Room actors currently resident in memory.
    pub static ref ACTIVE_ROOMS: IntGauge = IntGauge::new(
        "chat_active_rooms",
        "Room actors resident in memory"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    REGISTRY
        .register(Box::new(MESSAGES_PERSISTED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(EVENTS_BROADCAST.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(BROADCAST_DROPS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MODERATION_BLOCKED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MODERATION_FLAGGED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MODERATION_DEGRADED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RATE_LIMITED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PERMISSION_DENIED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SLOW_CONSUMER_CLOSES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(AUTH_FAILURES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(OPEN_CONNECTIONS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ONLINE_PRINCIPALS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ACTIVE_ROOMS.clone()))
        .unwrap();
}

/// Gather all metrics and encode them in Prometheus text format.
///
/// Returns a string suitable for HTTP response on the `/metrics` endpoint.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
