mod climate;
mod config;
mod coordinator;
mod mqtt;
mod onboarding;
mod tuya;

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use climate::entity::ThermostatEntity;
use coordinator::{Coordinator, DEFAULT_SCAN_INTERVAL};
use tuya::CloudApi;
use tuya::client::TuyaCloudClient;

#[derive(Parser)]
#[command(version, about = "Expose Tuya cloud thermostats as Home Assistant climate entities over MQTT")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the configured thermostats and bridge them to MQTT (default)
    Run,
    /// Check the Tuya credentials and list the devices visible to the account
    ListDevices {
        /// Also print each device's function metadata
        #[arg(long)]
        functions: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::ListDevices { functions } => list_devices(functions).await,
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn sigterm_stream() -> Result<Signal, String> {
    signal(SignalKind::terminate()).map_err(|e| format!("Failed to register SIGTERM handler: {e}"))
}

async fn list_devices(with_functions: bool) -> Result<(), String> {
    let tuya = config::TuyaConfig::from_env().map_err(|e| format!("Configuration error: {e}"))?;
    let client = TuyaCloudClient::new(&tuya.endpoint, &tuya.access_id, &tuya.access_secret)
        .map_err(|e| e.to_string())?;

    let devices = onboarding::discover(&client)
        .await
        .map_err(|e| format!("{} ({})", e, e.code()))?;

    println!("{} device(s) at {}:", devices.len(), tuya.endpoint);
    for device in &devices {
        println!("{}", onboarding::describe(device, &tuya.device_ids));
        if with_functions {
            if let Some(id) = device.id() {
                let functions = onboarding::functions(&client, id).await;
                println!("    {}", serde_json::Value::Object(functions));
            }
        }
    }

    if !tuya.device_ids.is_empty() {
        onboarding::validate_selection(&devices, &tuya.device_ids)
            .map_err(|e| format!("{} ({})", e, e.code()))?;
        println!("TUYA_DEVICE_IDS selection is valid");
    }
    Ok(())
}

async fn run() -> Result<(), String> {
    let config = config::Config::from_env().map_err(|e| format!("Configuration error: {e}"))?;

    info!(
        "Starting tuya-cloud-thermostat bridge (endpoint={}, mqtt={}:{}, devices={})",
        config.tuya.endpoint,
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.tuya.device_ids.len(),
    );

    let client = TuyaCloudClient::new(
        &config.tuya.endpoint,
        &config.tuya.access_id,
        &config.tuya.access_secret,
    )
    .map_err(|e| e.to_string())?;
    client
        .connect()
        .await
        .map_err(|e| format!("Failed to connect to Tuya cloud: {e}"))?;
    let api: Arc<dyn CloudApi> = Arc::new(client);

    let (coordinator, handle) =
        Coordinator::new(api.clone(), config.tuya.device_ids.clone(), DEFAULT_SCAN_INTERVAL);
    coordinator
        .first_refresh()
        .await
        .map_err(|e| format!("Initial poll failed: {e}"))?;

    let entities: Vec<Arc<ThermostatEntity>> = config
        .tuya
        .device_ids
        .iter()
        .map(|id| Arc::new(ThermostatEntity::new(id, api.clone(), handle.clone())))
        .collect();
    for entity in &entities {
        info!("  Thermostat: {} ({})", entity.name(), entity.device_id());
    }
    let by_device: HashMap<String, Arc<ThermostatEntity>> = entities
        .iter()
        .map(|e| (e.device_id().to_string(), e.clone()))
        .collect();

    let coordinator_handle = tokio::spawn(coordinator.run());

    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::MqttMessage>(100);
    let mqtt_client = mqtt::client::MqttClient::new(&config, entities);
    let state_rx = handle.subscribe();
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, state_rx).await;
    });

    let topic_prefix = config.mqtt.topic_prefix.clone();
    let mut sigterm = sigterm_stream()?;

    // Main loop: route MQTT commands to entities + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                let Some((device_id, field)) = mqtt::parse_command_topic(&msg.topic, &topic_prefix) else {
                    continue;
                };
                let Some(entity) = by_device.get(device_id) else {
                    warn!("Unknown device in command topic: {}", device_id);
                    continue;
                };
                let Some(command) = mqtt::parse_command(field, &msg.payload) else {
                    continue;
                };
                let entity = entity.clone();
                tokio::spawn(async move {
                    if let Err(e) = entity.apply(command).await {
                        warn!("Command for {} failed: {}", entity.device_id(), e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    coordinator_handle.abort();
    mqtt_handle.abort();
    info!("tuya-cloud-thermostat bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::process;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn one_sigterm_stream_sees_repeated_signals() {
        let mut sigterm = sigterm_stream().unwrap();
        for _ in 0..2 {
            let status = process::Command::new("kill")
                .args(["-TERM", &process::id().to_string()])
                .status()
                .unwrap();
            assert!(status.success());
            tokio::time::timeout(Duration::from_secs(5), sigterm.recv())
                .await
                .unwrap();
        }
    }
}
