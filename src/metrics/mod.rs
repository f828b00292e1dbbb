//! Prometheus collectors of the consensus engine.
//!
//! Every collector is labelled with `node_id` so that several nodes of an
//! in-process cluster can share the registry.

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

lazy_static! {
    pub static ref ELECTIONS_STARTED: IntCounterVec = IntCounterVec::new(
        Opts::new("elections_started", "Number of elections started as candidate"),
        &["node_id"]
    )
    .expect("metric can not be created");

    pub static ref LEADER_ELECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("leader_elected", "Number of terms this node won"),
        &["node_id"]
    )
    .expect("metric can not be created");

    pub static ref REPLICATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("replication_failures", "Failed AppendEntries or InstallSnapshot round trips"),
        &["node_id", "peer_id"]
    )
    .expect("metric can not be created");

    pub static ref STORAGE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("storage_failures", "Failed durable writes of log or persistent state"),
        &["node_id"]
    )
    .expect("metric can not be created");

    pub static ref COMMIT_INDEX: IntGaugeVec = IntGaugeVec::new(
        Opts::new("commit_index", "Highest log index known to be committed"),
        &["node_id"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("walraft".to_string()), None)
            .expect("registry can be created");
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(ELECTIONS_STARTED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LEADER_ELECTED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REPLICATION_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(STORAGE_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(COMMIT_INDEX.clone()))
        .expect("collector can be registered");
}

/// Renders every collector in the prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode metrics: {:?}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
