use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref GATEWAYS_CREATED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_gateways_created_total",
        "Total gateways created"
    ))
    .unwrap();
    pub static ref GATEWAYS_DELETED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_gateways_deleted_total",
        "Total gateways deleted"
    ))
    .unwrap();
    pub static ref DEVICES_ATTACHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_devices_attached_total",
        "Total peripheral devices attached to a gateway"
    ))
    .unwrap();
    pub static ref DEVICES_DETACHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_devices_detached_total",
        "Total peripheral devices explicitly detached"
    ))
    .unwrap();
    pub static ref DEVICES_ORPHANED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_devices_orphaned_total",
        "Total peripheral devices orphaned by gateway deletion"
    ))
    .unwrap();
    pub static ref CONFLICTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_conflicts_total",
        "Total requests rejected by a uniqueness rule"
    ))
    .unwrap();
    pub static ref CAPACITY_REJECTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "registry_capacity_rejections_total",
        "Total device attachments rejected because the gateway was full"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(GATEWAYS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GATEWAYS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES_ATTACHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES_DETACHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES_ORPHANED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CAPACITY_REJECTIONS_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
