//! Embedded MQTT broker (rumqttd)
//!
//! Single-box deployments run without an external broker: the ingest client
//! and egress publisher connect to this one like any other. Connection and
//! payload limits come from the `[broker]` config section; the router's log
//! segments are sized off the payload cap so broker memory stays bounded.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Router commit-log shape: payloads per segment times segment count caps
/// the retained backlog
const PAYLOADS_PER_SEGMENT: usize = 16;
const SEGMENT_COUNT: usize = 8;

/// Per-connection handshake deadline
const CONNECTION_TIMEOUT_MS: u16 = 10_000;
/// In-flight publish cap per connection
const MAX_INFLIGHT: usize = 64;

fn listener_settings(listen: SocketAddr, max_payload_bytes: usize) -> ServerSettings {
    ServerSettings {
        name: "tcp".to_string(),
        listen,
        tls: None,
        next_connection_delay_ms: 0,
        connections: ConnectionSettings {
            connection_timeout_ms: CONNECTION_TIMEOUT_MS,
            max_payload_size: max_payload_bytes,
            max_inflight_count: MAX_INFLIGHT,
            auth: None,
            dynamic_filters: false,
            external_auth: None,
        },
    }
}

/// Start the embedded broker on a dedicated thread. Returns false when the
/// listen address is unusable or the thread cannot be spawned; callers fall
/// back to an external broker.
pub fn start_embedded_broker(app_config: &AppConfig) -> bool {
    let listen =
        format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen_addr: SocketAddr = match listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, listen = %listen, "broker_listen_unusable");
            return false;
        }
    };

    let max_connections = app_config.broker_max_connections();
    let max_payload_bytes = app_config.broker_max_payload_bytes();

    let router = RouterConfig {
        max_segment_size: max_payload_bytes.saturating_mul(PAYLOADS_PER_SEGMENT),
        max_segment_count: SEGMENT_COUNT,
        max_connections,
        max_outgoing_packet_count: MAX_INFLIGHT as u64,
        initialized_filters: None,
        ..Default::default()
    };

    let mut listeners = HashMap::new();
    listeners.insert("tcp".to_string(), listener_settings(listen_addr, max_payload_bytes));

    let broker_config = Config {
        id: 0,
        router,
        v4: Some(listeners),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    };

    let spawned = thread::Builder::new()
        .name("embedded-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(broker_config);
            // start() blocks for the life of the broker
            if let Err(e) = broker.start() {
                warn!(error = %e, "embedded_broker_exited");
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "embedded_broker_thread_failed");
        return false;
    }

    info!(
        listen = %listen,
        max_connections = %max_connections,
        max_payload_bytes = %max_payload_bytes,
        "embedded_broker_listening"
    );
    true
}
