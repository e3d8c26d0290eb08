//! MQTT publisher for egress events
//!
//! Publishes outbound envelopes to MQTT topics for downstream consumers:
//! - inventory events (QoS 1, at-least-once)
//! - metrics snapshots (QoS 0, fire-and-forget)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    events_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher connected to the egress broker
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("{}-egress-{}", config.service_name(), std::process::id());
        let mut mqttoptions =
            MqttOptions::new(client_id, config.mqtt_egress_host(), config.mqtt_egress_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) =
            (config.mqtt_egress_username(), config.mqtt_egress_password())
        {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "egress_mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            events_topic: config.mqtt_egress_events_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown, then drain remaining messages
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            events = %self.events_topic,
            metrics = %self.metrics_topic,
            "egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => {
                            info!("egress_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Inventory(envelope) => {
                let Ok(json) = serde_json::to_string(&envelope) else {
                    return;
                };
                // QoS 1 for inventory events (at-least-once delivery)
                if let Err(e) = self
                    .client
                    .publish(&self.events_topic, QoS::AtLeastOnce, false, json.as_bytes())
                    .await
                {
                    error!(error = %e, "egress_inventory_event_failed");
                }
            }
            EgressMessage::Metrics(payload) => {
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.metrics_topic, QoS::AtMostOnce, false, json.as_bytes())
                        .await
                    {
                        debug!(error = %e, "egress_metrics_failed");
                    }
                }
            }
        }
    }
}
