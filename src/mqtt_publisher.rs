use crate::config::MqttConfig;
use crate::cycle_driver::Publisher;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Publishes bridge output to the broker through a `rumqttc` client.
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    /// Connects to the broker, retrying as configured.
    ///
    /// The returned receiver resolves once the background event loop has given up on the
    /// broker; the caller should treat that as fatal.
    pub async fn connect(config: &MqttConfig) -> Result<(Self, oneshot::Receiver<BridgeError>)> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((username, password)) = &config.credentials {
            options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        wait_for_connack(&mut event_loop, &config.host, config.port, config.connection_attempts)
            .await?;

        let (lost_tx, lost_rx) = oneshot::channel();
        tokio::spawn(drive_event_loop(event_loop, lost_tx));

        Ok((
            Self {
                client,
                qos: config.qos,
            },
            lost_rx,
        ))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: String, retain: bool) -> Result<()> {
        self.client.publish(topic, self.qos, retain, payload).await?;
        Ok(())
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop, host: &str, port: u16, attempts: u32) -> Result<()> {
    let mut last_error = String::from("no connection attempt made");

    for attempt in 1..=attempts {
        info!(
            "Connecting to MQTT broker at {}:{} (attempt {}/{})",
            host, port, attempt, attempts
        );

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected with result code {:?}", ack.code);
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    break;
                }
            }
        }

        if attempt < attempts {
            sleep(Duration::from_secs(1)).await;
        }
    }

    Err(BridgeError::Connect {
        attempts,
        last_error,
    })
}

/// Keeps the client's network loop turning. `rumqttc` reconnects on the next poll after a
/// failure, so only a run of failures counts as a lost connection.
async fn drive_event_loop(mut event_loop: EventLoop, lost: oneshot::Sender<BridgeError>) {
    let mut consecutive_errors = 0u32;

    loop {
        match event_loop.poll().await {
            Ok(event) => {
                consecutive_errors = 0;
                debug!("MQTT event: {:?}", event);
            }
            Err(ConnectionError::RequestsDone) => {
                debug!("MQTT client dropped, stopping event loop");
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    "MQTT connection error ({}/{}): {}",
                    consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
                );

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!("Too many consecutive MQTT errors. Giving up on the broker.");
                    let _ = lost.send(BridgeError::ConnectionLost(e.to_string()));
                    break;
                }

                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
