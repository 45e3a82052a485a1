//! Prometheus collectors for leader elections.
//!
//! Collectors are labelled by watcher instance id so several watchers in one
//! process stay distinguishable.
use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    /// Labels: instance, direction (`acquired` | `released`)
    pub static ref LEADER_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("leader_transitions", "Leadership gained or given up"),
        &["instance", "direction"]
    )
    .expect("metric can not be created");

    pub static ref LEADER_LOCK_BREAKS: IntCounterVec = IntCounterVec::new(
        Opts::new("leader_lock_breaks", "Locks broken after the holder went silent"),
        &["instance"]
    )
    .expect("metric can not be created");

    pub static ref HEARTBEATS_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("heartbeats_sent", "Heartbeats broadcast while leader"),
        &["instance"]
    )
    .expect("metric can not be created");

    /// Labels: instance, op (`heartbeat` | `lock_acquired` | `lock_released` | `ack`)
    pub static ref NOTIFY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("notify_failures", "Broadcasts or acks that failed"),
        &["instance", "op"]
    )
    .expect("metric can not be created");

    pub static ref IS_LEADER: IntGaugeVec = IntGaugeVec::new(
        Opts::new("is_leader", "1 while this instance holds leadership"),
        &["instance"]
    )
    .expect("metric can not be created");

    /// Process-wide registry with every leader collector registered
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry).expect("collector can be registered");
        registry
    };
}

/// Registers every leader collector with `registry`. Fails with
/// `AlreadyReg` on a registry that already carries them, such as [`REGISTRY`].
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(LEADER_TRANSITIONS.clone()))?;
    registry.register(Box::new(LEADER_LOCK_BREAKS.clone()))?;
    registry.register(Box::new(HEARTBEATS_SENT.clone()))?;
    registry.register(Box::new(NOTIFY_FAILURES.clone()))?;
    registry.register(Box::new(IS_LEADER.clone()))?;
    Ok(())
}

/// Drops every series labelled with `instance`
pub(crate) fn remove_instance_metrics(instance: &str) {
    for direction in ["acquired", "released"] {
        let _ = LEADER_TRANSITIONS.remove_label_values(&[instance, direction]);
    }
    for op in ["heartbeat", "lock_acquired", "lock_released", "ack"] {
        let _ = NOTIFY_FAILURES.remove_label_values(&[instance, op]);
    }
    let _ = LEADER_LOCK_BREAKS.remove_label_values(&[instance]);
    let _ = HEARTBEATS_SENT.remove_label_values(&[instance]);
    let _ = IS_LEADER.remove_label_values(&[instance]);
}

/// Text exposition of `registry` for a scrape endpoint
pub fn encode_metrics(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode leader metrics: {}", e);
        return String::default();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("leader metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}
