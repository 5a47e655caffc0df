use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout, Duration},
};

use crate::{config::AppConfig, publisher::Bus};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;
const DROP_WARN_EVERY: u64 = 100;

/// MQTT connection owned by the service for its whole lifetime.
///
/// After the initial handshake the event loop runs on its own task and
/// reconnects on its own; `disconnect` must be called on shutdown.
pub struct MqttBus {
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl MqttBus {
    fn from_parts(client: AsyncClient, driver: Option<JoinHandle<()>>) -> Self {
        Self {
            client,
            driver: Mutex::new(driver),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publishes discarded because the request queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Connects with a bounded number of attempts. Exhausting them is fatal.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        if config.mqtt_broker.trim().is_empty() {
            bail!("MQTT_BROKER is not set");
        }

        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            tracing::info!(
                broker = %config.mqtt_broker,
                port = config.mqtt_port,
                attempt,
                max_attempts = CONNECT_ATTEMPTS,
                "connecting to MQTT broker"
            );
            let (client, mut eventloop) = AsyncClient::new(options(config), REQUEST_CAPACITY);
            match timeout(CONNECT_TIMEOUT, await_connack(&mut eventloop)).await {
                Ok(Ok(())) => {
                    tracing::info!(broker = %config.mqtt_broker, port = config.mqtt_port, "connected to MQTT broker");
                    let driver = tokio::spawn(drive(eventloop));
                    return Ok(Self::from_parts(client, Some(driver)));
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, error = %err, "failed to connect to MQTT broker");
                    last_error = Some(err);
                }
                Err(_) => {
                    tracing::warn!(attempt, "timed out waiting for MQTT CONNACK");
                    last_error = Some(anyhow::anyhow!("no CONNACK within {}s", CONNECT_TIMEOUT.as_secs()));
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                sleep(CONNECT_BACKOFF).await;
            }
        }

        let err = last_error.unwrap_or_else(|| anyhow::anyhow!("no connection attempt made"));
        Err(err).with_context(|| {
            format!(
                "unable to reach MQTT broker {}:{} after {} attempts",
                config.mqtt_broker, config.mqtt_port, CONNECT_ATTEMPTS
            )
        })
    }

    /// Sends DISCONNECT and stops the event loop task.
    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(error = %err, "failed to request MQTT disconnect");
        }
        let driver = self.driver.lock().ok().and_then(|mut guard| guard.take());
        if let Some(driver) = driver {
            let abort = driver.abort_handle();
            if timeout(Duration::from_secs(2), driver).await.is_err() {
                abort.abort();
            }
        }
        tracing::info!("disconnected from MQTT broker");
    }
}

/// While the broker is unreachable the request queue fills up; messages are
/// then dropped and the event loop's own reconnect restores delivery.
impl Bus for MqttBus {
    fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        if let Err(err) = self.client.try_publish(topic, QoS::AtMostOnce, retain, payload) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
                tracing::warn!(topic = %topic, dropped, error = %err, "MQTT request queue unavailable, dropping publish");
            } else {
                tracing::debug!(topic = %topic, dropped, "dropping publish");
            }
        }
        Ok(())
    }
}

fn options(config: &AppConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.mqtt_broker, config.mqtt_port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some((user, pass)) = config.mqtt_credentials() {
        options.set_credentials(user, pass);
    }
    options
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                bail!("broker refused connection: {:?}", ack.code);
            }
            _ => continue,
        }
    }
}

async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("reconnected to MQTT broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "MQTT connection error, retrying");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
