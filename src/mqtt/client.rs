use std::collections::HashMap;
use std::sync::Arc;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::climate::entity::ThermostatEntity;
use crate::config::Config;
use crate::coordinator::CoordinatorState;

use super::MqttMessage;
use super::discovery::{ClimateDiscovery, PAYLOAD_OFFLINE, PAYLOAD_ONLINE, state_messages};

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
    entities: Vec<Arc<ThermostatEntity>>,
    /// Last payload published per topic; cleared on every (re)connect.
    last_values: HashMap<String, String>,
}

impl MqttClient {
    pub fn new(config: &Config, entities: Vec<Arc<ThermostatEntity>>) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(std::time::Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        // Every entity lists the bridge topic in its availability, so the
        // broker marks them all unavailable if the bridge drops.
        let lwt = rumqttc::LastWill::new(
            config.bridge_status_topic(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
            entities,
            last_values: HashMap::new(),
        }
    }

    /// Run the MQTT event loop. On connect, announces the entities and
    /// subscribes to their command topics; forwards incoming commands through
    /// `command_tx`; republishes entity state whenever the coordinator
    /// publishes a new poll result.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut state_rx: watch::Receiver<CoordinatorState>,
    ) {
        let subscribe_topics: Vec<String> = self
            .entities
            .iter()
            .map(|e| self.config.command_topic_filter(e.device_id()))
            .collect();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            self.last_values.clear();

                            let topic = self.config.bridge_status_topic();
                            if let Err(e) = self
                                .client
                                .publish(&topic, QoS::AtLeastOnce, true, PAYLOAD_ONLINE)
                                .await
                            {
                                error!("Failed to publish online status: {}", e);
                            }

                            for topic in &subscribe_topics {
                                if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
                                    error!("Failed to subscribe to {}: {}", topic, e);
                                }
                            }

                            let state = state_rx.borrow_and_update().clone();
                            self.publish_entities(&state, &command_tx).await;
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            forward(&command_tx, &publish).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                Ok(()) = state_rx.changed() => {
                    let state = state_rx.borrow_and_update().clone();
                    self.publish_entities(&state, &command_tx).await;
                }
            }
        }
    }

    /// Publish discovery and state for every entity, skipping topics whose
    /// payload has not changed.
    async fn publish_entities(
        &mut self,
        state: &CoordinatorState,
        command_tx: &mpsc::Sender<MqttMessage>,
    ) {
        let mut messages = Vec::new();
        for entity in &self.entities {
            let climate = entity.state_from(state);
            let discovery = ClimateDiscovery::new(&self.config, entity, &climate);
            match serde_json::to_string(&discovery) {
                Ok(payload) => messages.push((discovery.topic(&self.config), payload)),
                Err(e) => error!("Failed to encode discovery for {}: {}", entity.device_id(), e),
            }
            messages.extend(state_messages(&self.config, entity.device_id(), &climate));
        }

        for (topic, payload) in messages {
            if self.last_values.get(&topic) == Some(&payload) {
                continue;
            }
            debug!("Publishing {}: {}", topic, payload);
            if let Err(e) = self
                .client
                .publish(&topic, QoS::AtLeastOnce, true, payload.as_bytes())
                .await
            {
                warn!("Failed to publish {}: {}", topic, e);
                continue;
            }
            self.last_values.insert(topic, payload);
            // Drive the event loop so queued publishes reach the socket before
            // the request channel fills up.
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    forward(command_tx, &publish).await;
                }
                Err(e) => {
                    error!("MQTT error after publish flush: {}", e);
                }
                _ => {}
            }
        }
    }
}

async fn forward(command_tx: &mpsc::Sender<MqttMessage>, publish: &rumqttc::Publish) {
    let msg = MqttMessage {
        topic: publish.topic.clone(),
        payload: String::from_utf8_lossy(&publish.payload).to_string(),
    };
    if command_tx.send(msg).await.is_err() {
        warn!("Command channel closed");
    }
}
