//! MQTT client for receiving bus readings
//!
//! Every message on the inbound topic is a tagged reading: a `type`
//! discriminator plus a base64-encoded JSON payload. Read batches, sensor
//! configs, and run-state notifications go to the engine over its bounded
//! channel; ASN payloads reconcile against the store right here on the
//! ingest path; device alerts and controller chatter are handled in place.

use crate::domain::tag::AdvanceShippingNotice;
use crate::domain::types::{
    ControllerHeartbeat, ControllerStatusUpdate, DeviceAlert, InventoryData, Reading,
    SchedulerRunState, SensorConfigNotification, CONTROLLER_READY, READING_ASN_DATA,
    READING_CONTROLLER_HEARTBEAT, READING_CONTROLLER_STATUS, READING_DEVICE_ALERT,
    READING_INVENTORY_DATA, READING_SCHEDULER_RUN_STATE, READING_SENSOR_CONFIG,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::alerts::AlertClient;
use crate::io::store::TagStore;
use crate::services::engine::EngineMessage;
use crate::services::reconciler::AsnReconciler;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a reading's base64 JSON value into a payload type. Tolerates both
/// minified and pretty-printed JSON.
pub fn decode_reading_payload<T: DeserializeOwned>(value: &str) -> Result<T, PayloadError> {
    let bytes = BASE64.decode(value.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Shared handles the ingest dispatcher needs
pub struct IngestContext {
    pub engine_tx: mpsc::Sender<EngineMessage>,
    pub reconciler: Arc<AsnReconciler>,
    pub store: Arc<dyn TagStore>,
    pub alerts: Arc<AlertClient>,
    pub metrics: Arc<Metrics>,
}

/// Start the MQTT ingest client and dispatch readings until shutdown
pub async fn start_ingest_client(
    config: &Config,
    ctx: IngestContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingest-{}", config.service_name(), std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "ingest_subscribed"
    );

    // Rate-limit queue-full warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ingest_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match serde_json::from_slice::<Reading>(&publish.payload) {
                            Ok(reading) => {
                                ctx.metrics.record_reading_received();
                                dispatch_reading(&ctx, &reading, &mut last_drop_warn).await;
                            }
                            Err(e) => {
                                ctx.metrics.record_reading_invalid();
                                warn!(topic = %publish.topic, error = %e, "unparsable_reading");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("ingest_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "ingest_mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Route one reading by its kind
async fn dispatch_reading(ctx: &IngestContext, reading: &Reading, last_drop_warn: &mut Instant) {
    match reading.kind.as_str() {
        READING_INVENTORY_DATA => {
            let Some(data) = parse_payload::<InventoryData>(ctx, reading) else {
                return;
            };
            if !validate_payload(ctx, reading, data.validate()) {
                return;
            }
            debug!(device_id = %data.device_id, reads = %data.data.len(), "inventory_data_received");
            forward_to_engine(ctx, EngineMessage::Reads(data), last_drop_warn);
        }
        READING_SENSOR_CONFIG => {
            let Some(notification) = parse_payload::<SensorConfigNotification>(ctx, reading)
            else {
                return;
            };
            if !validate_payload(ctx, reading, notification.validate()) {
                return;
            }
            forward_to_engine(ctx, EngineMessage::SensorConfig(notification), last_drop_warn);
        }
        READING_SCHEDULER_RUN_STATE => {
            let Some(state) = parse_payload::<SchedulerRunState>(ctx, reading) else {
                return;
            };
            if !validate_payload(ctx, reading, state.validate()) {
                return;
            }
            forward_to_engine(ctx, EngineMessage::RunState(state), last_drop_warn);
        }
        READING_ASN_DATA => {
            let Some(notices) = parse_payload::<Vec<AdvanceShippingNotice>>(ctx, reading) else {
                return;
            };
            match ctx.reconciler.process_shipping_notices(&notices).await {
                Ok(written) => debug!(epcs = %written, "asn_data_processed"),
                Err(e) => {
                    ctx.metrics.record_asn_error();
                    warn!(error = %e, "asn_data_failed");
                }
            }
        }
        READING_DEVICE_ALERT => {
            let Some(alert) = parse_payload::<DeviceAlert>(ctx, reading) else {
                return;
            };
            if !validate_payload(ctx, reading, alert.validate()) {
                return;
            }
            handle_device_alert(ctx, &alert).await;
        }
        READING_CONTROLLER_HEARTBEAT => {
            let Some(heartbeat) = parse_payload::<ControllerHeartbeat>(ctx, reading) else {
                return;
            };
            debug!(device_id = %heartbeat.device_id, sent_on = %heartbeat.sent_on, "controller_heartbeat");
        }
        READING_CONTROLLER_STATUS => {
            let Some(update) = parse_payload::<ControllerStatusUpdate>(ctx, reading) else {
                return;
            };
            if update.status == CONTROLLER_READY {
                // sensor re-query is owned by the external sensor service
                info!("controller_ready");
            }
        }
        other => {
            debug!(kind = %other, "unrecognized_reading");
        }
    }
}

async fn handle_device_alert(ctx: &IngestContext, alert: &DeviceAlert) {
    info!(
        device_id = %alert.device_id,
        alert_number = %alert.alert_number,
        severity = %alert.severity,
        "device_alert"
    );

    if !alert.is_inventory_unload() {
        return;
    }

    match ctx.store.delete_all().await {
        Ok(()) => {
            info!("tag_collection_deleted");
            if let Err(e) = ctx.alerts.post_delete_completion().await {
                warn!(error = %e, "delete_completion_alert_failed");
            }
        }
        Err(e) => {
            ctx.metrics.record_store_error();
            error!(error = %e, "tag_collection_delete_failed");
        }
    }
}

fn parse_payload<T: DeserializeOwned>(ctx: &IngestContext, reading: &Reading) -> Option<T> {
    match decode_reading_payload::<T>(&reading.value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            ctx.metrics.record_reading_invalid();
            warn!(kind = %reading.kind, error = %e, "invalid_reading_payload");
            None
        }
    }
}

fn validate_payload(
    ctx: &IngestContext,
    reading: &Reading,
    result: Result<(), crate::domain::types::ValidationError>,
) -> bool {
    if let Err(e) = result {
        ctx.metrics.record_reading_invalid();
        warn!(kind = %reading.kind, error = %e, "reading_rejected");
        return false;
    }
    true
}

/// Hand a message to the engine without blocking the MQTT eventloop
fn forward_to_engine(ctx: &IngestContext, msg: EngineMessage, last_drop_warn: &mut Instant) {
    if let Err(e) = ctx.engine_tx.try_send(msg) {
        match e {
            TrySendError::Full(_) => {
                ctx.metrics.record_read_dropped_queue();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!("engine queue full, reading dropped");
                    *last_drop_warn = Instant::now();
                }
            }
            TrySendError::Closed(_) => {
                warn!("engine channel closed");
            }
        }
    }
}
