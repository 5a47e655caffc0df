use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{
    signal,
    sync::watch,
    time::{Duration, Instant},
};

use crate::config::AppConfig;
use crate::{
    docker::DockerLogs, metrics, mqtt::MqttBus, publisher::Publisher, scheduler::Scheduler,
    ttn::TtnClient,
};

pub struct Service {
    config: AppConfig,
}

impl Service {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config;

        let user = if config.mqtt_user.is_empty() { "(none)" } else { config.mqtt_user.as_str() };
        tracing::info!(
            broker = %config.mqtt_broker,
            port = config.mqtt_port,
            user = %user,
            container = %config.container,
            ttn_cluster = %config.ttn_cluster,
            ttn_gateway = %config.ttn_gateway_id,
            topic_prefix = %config.topic_prefix,
            debug = config.debug,
            "gateway publisher starting"
        );
        if !config.ttn_enabled() {
            tracing::info!("TTN cluster, gateway id or API key missing; remote stats will publish as disconnected");
        }

        let status = TtnClient::new(&config)?;
        let bus = Arc::new(
            MqttBus::connect(&config)
                .await
                .context("connect to MQTT broker")?,
        );

        let metrics = Arc::new(metrics::Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let slowest = config.local_interval_secs.max(config.remote_interval_secs);
        let health_handle = tokio::spawn(metrics::monitor_health(
            metrics.clone(),
            shutdown_rx,
            Duration::from_secs(slowest.saturating_mul(3).max(30)),
        ));

        let scheduler = Scheduler::new(
            &config,
            DockerLogs::new(),
            status,
            Publisher::new(bus.clone(), config.topic_prefix.clone()),
            metrics,
            Instant::now(),
        );
        scheduler.run(shutdown_signal()).await;

        shutdown_tx.send(()).ok();
        bus.disconnect().await;
        health_handle.await.context("health monitor task")?;
        Ok(())
    }
}

/// Resolves on ctrl-c, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl-c received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
