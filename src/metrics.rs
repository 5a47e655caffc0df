use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;

/// Counters for the polling chains, reported by the health heartbeat.
pub struct Metrics {
    local_cycles: AtomicU64,
    remote_cycles: AtomicU64,
    remote_absent: AtomicU64,
    cycle_failures: AtomicU64,
    last_cycle: Mutex<Option<Instant>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            local_cycles: AtomicU64::new(0),
            remote_cycles: AtomicU64::new(0),
            remote_absent: AtomicU64::new(0),
            cycle_failures: AtomicU64::new(0),
            last_cycle: Mutex::new(None),
        }
    }

    pub fn record_local_cycle(&self) {
        self.local_cycles.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_remote_cycle(&self, absent: bool) {
        self.remote_cycles.fetch_add(1, Ordering::Relaxed);
        if absent {
            self.remote_absent.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    pub fn record_failure(&self) {
        self.cycle_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_cycle.lock() {
            *guard = Some(Instant::now());
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_cycle_age = self.last_cycle.lock().ok().and_then(|guard| {
            guard.map(|instant| Instant::now().saturating_duration_since(instant))
        });
        HealthSnapshot {
            local_cycles: self.local_cycles.load(Ordering::Relaxed),
            remote_cycles: self.remote_cycles.load(Ordering::Relaxed),
            remote_absent: self.remote_absent.load(Ordering::Relaxed),
            cycle_failures: self.cycle_failures.load(Ordering::Relaxed),
            last_cycle_age,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub local_cycles: u64,
    pub remote_cycles: u64,
    pub remote_absent: u64,
    pub cycle_failures: u64,
    pub last_cycle_age: Option<Duration>,
}

pub async fn monitor_health(
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<()>,
    idle_threshold: Duration,
) {
    let mut ticker = interval(Duration::from_secs(60));
    // the first tick fires immediately; nothing to report yet
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let snapshot = metrics.snapshot();
                tracing::info!(
                    local_cycles = snapshot.local_cycles,
                    remote_cycles = snapshot.remote_cycles,
                    remote_absent = snapshot.remote_absent,
                    cycle_failures = snapshot.cycle_failures,
                    "health heartbeat"
                );
                match snapshot.last_cycle_age {
                    Some(age) if age > idle_threshold => {
                        tracing::warn!(
                            idle_seconds = ?age.as_secs_f64(),
                            "no polling cycle completed in the last {} seconds",
                            idle_threshold.as_secs()
                        );
                    }
                    None => tracing::warn!("no polling cycle has completed yet"),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_cycles() {
        let metrics = Metrics::new();
        assert!(metrics.snapshot().last_cycle_age.is_none());

        metrics.record_local_cycle();
        metrics.record_remote_cycle(true);
        metrics.record_remote_cycle(false);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.local_cycles, 1);
        assert_eq!(snapshot.remote_cycles, 2);
        assert_eq!(snapshot.remote_absent, 1);
        assert_eq!(snapshot.cycle_failures, 1);
        assert!(snapshot.last_cycle_age.is_some());
    }

    #[tokio::test]
    async fn monitor_stops_on_shutdown() {
        let (tx, rx) = watch::channel(());
        let handle = tokio::spawn(monitor_health(
            Arc::new(Metrics::new()),
            rx,
            Duration::from_secs(30),
        ));
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
