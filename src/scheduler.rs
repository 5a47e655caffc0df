use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::{future::Future, sync::Arc};
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

use crate::{
    config::AppConfig,
    docker::LogSource,
    metrics::Metrics,
    publisher::{Bus, Publisher},
    station, ttn,
    ttn::StatusSource,
};

pub const HEARTBEAT: Duration = Duration::from_secs(1);
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(5);

/// Interval bookkeeping for one polling source.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    last_fired: Instant,
}

impl Cadence {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last_fired: start,
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_fired) >= self.interval
    }

    fn mark(&mut self, now: Instant) {
        self.last_fired = now;
    }
}

/// Which chains ran during a tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub local: bool,
    pub remote: bool,
}

/// Polls the packet forwarder logs and the TTN status endpoint on two
/// independent cadences and publishes what it derives.
pub struct Scheduler<L, S, B> {
    logs: L,
    status: S,
    publisher: Publisher<B>,
    metrics: Arc<Metrics>,
    container: String,
    tail_lines: usize,
    max_age_secs: u64,
    local: Cadence,
    remote: Cadence,
}

impl<L, S, B> Scheduler<L, S, B>
where
    L: LogSource,
    S: StatusSource,
    B: Bus,
{
    pub fn new(
        config: &AppConfig,
        logs: L,
        status: S,
        publisher: Publisher<B>,
        metrics: Arc<Metrics>,
        start: Instant,
    ) -> Self {
        Self {
            logs,
            status,
            publisher,
            metrics,
            container: config.container.clone(),
            tail_lines: config.log_tail_lines,
            max_age_secs: config.max_age_secs,
            local: Cadence::new(Duration::from_secs(config.local_interval_secs), start),
            remote: Cadence::new(Duration::from_secs(config.remote_interval_secs), start),
        }
    }

    /// Runs every chain whose interval has elapsed at `now`.
    ///
    /// A chain's timestamp is reset even when it fails, and a failure in one
    /// chain never stops the other from being checked.
    pub async fn tick(&mut self, now: Instant) -> Result<Fired> {
        let mut fired = Fired::default();
        let mut failures = Vec::new();

        if self.local.due(now) {
            self.local.mark(now);
            fired.local = true;
            if let Err(err) = self.run_local().await {
                failures.push(err.context("local cycle"));
            }
        }

        if self.remote.due(now) {
            self.remote.mark(now);
            fired.remote = true;
            if let Err(err) = self.run_remote().await {
                failures.push(err.context("remote cycle"));
            }
        }

        let mut failures = failures.into_iter();
        match (failures.next(), failures.next()) {
            (None, _) => Ok(fired),
            (Some(err), None) => Err(err),
            (Some(first), Some(second)) => Err(anyhow!("{first:#}; {second:#}")),
        }
    }

    async fn run_local(&self) -> Result<()> {
        let lines = self.logs.tail(&self.container, self.tail_lines).await;
        let stats = station::extract(&lines);
        self.publisher
            .publish_local(&stats)
            .context("publish local stats")?;
        self.metrics.record_local_cycle();
        tracing::info!(
            container = %self.container,
            rx = stats.rx_count,
            tx = stats.tx_count,
            connected = stats.connected,
            "local stats published"
        );
        Ok(())
    }

    async fn run_remote(&self) -> Result<()> {
        let document = self.status.fetch().await;
        let status = ttn::normalize(document.as_ref(), self.max_age_secs);
        self.publisher
            .publish_remote(&status, Utc::now())
            .context("publish TTN stats")?;
        self.metrics.record_remote_cycle(document.is_none());
        tracing::info!(
            up = status.uplink_count,
            down = status.downlink_count,
            connected = status.connected,
            "TTN stats published"
        );
        Ok(())
    }

    /// Drives the heartbeat until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut heartbeat = interval(HEARTBEAT);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            container = %self.container,
            local_interval = ?self.local.interval,
            remote_interval = ?self.remote.interval,
            "polling started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = heartbeat.tick() => {
                    if let Err(err) = self.tick(Instant::now()).await {
                        self.metrics.record_failure();
                        tracing::error!(error = %format!("{err:#}"), "polling cycle failed, backing off");
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = sleep(FAILURE_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        tracing::info!("polling stopped");
    }
}
