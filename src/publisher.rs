use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;

use crate::{station::LocalStats, ttn::RemoteStatus};

/// Fire-and-forget message bus. Implementations must not block on delivery.
pub trait Bus: Send + Sync {
    fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;
}

impl<B: Bus + ?Sized> Bus for Arc<B> {
    fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        (**self).publish(topic, payload, retain)
    }
}

/// Maps stats records onto retained topics under a fixed prefix.
pub struct Publisher<B> {
    bus: B,
    prefix: String,
}

impl<B: Bus> Publisher<B> {
    pub fn new(bus: B, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { bus, prefix }
    }

    #[cfg(test)]
    fn bus(&self) -> &B {
        &self.bus
    }

    pub fn publish_local(&self, stats: &LocalStats) -> Result<()> {
        self.send("local/rx_count", stats.rx_count.to_string())?;
        self.send("local/tx_count", stats.tx_count.to_string())?;
        self.send("local/connected", flag(stats.connected))?;
        self.send("local/last_update", timestamp(stats.timestamp))?;
        Ok(())
    }

    /// `published_at` is stamped into `ttn/last_update` so subscribers can
    /// spot a stalled publisher.
    pub fn publish_remote(&self, status: &RemoteStatus, published_at: DateTime<Utc>) -> Result<()> {
        self.send("ttn/uplink_count", status.uplink_count.to_string())?;
        self.send("ttn/downlink_count", status.downlink_count.to_string())?;
        self.send(
            "ttn/last_uplink_received_at",
            status.last_uplink_received_at.clone(),
        )?;
        self.send(
            "ttn/last_downlink_received_at",
            status.last_downlink_received_at.clone(),
        )?;
        self.send("ttn/connected", flag(status.connected))?;
        self.send("ttn/last_update", timestamp(published_at))?;
        Ok(())
    }

    fn send(&self, suffix: &str, payload: String) -> Result<()> {
        let topic = format!("{}/{}", self.prefix, suffix);
        self.bus
            .publish(&topic, payload, true)
            .with_context(|| format!("publish {topic}"))
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String, bool)>>);

    impl Bus for Recorder {
        fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
            self.0.lock().unwrap().push((topic.to_string(), payload, retain));
            Ok(())
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 7, 10, 40, 12).unwrap()
    }

    #[test]
    fn publishes_remote_fields_retained() {
        let publisher = Publisher::new(Recorder::default(), "gateways/");
        let status = RemoteStatus {
            uplink_count: 42,
            downlink_count: 3,
            last_uplink_received_at: "2025-12-07T10:40:12.345Z".into(),
            last_downlink_received_at: String::new(),
            connected: true,
        };
        publisher.publish_remote(&status, at()).unwrap();

        let sent = publisher.bus().0.lock().unwrap().clone();
        let expected = vec![
            ("gateways/ttn/uplink_count", "42"),
            ("gateways/ttn/downlink_count", "3"),
            ("gateways/ttn/last_uplink_received_at", "2025-12-07T10:40:12.345Z"),
            ("gateways/ttn/last_downlink_received_at", ""),
            ("gateways/ttn/connected", "1"),
            ("gateways/ttn/last_update", "2025-12-07T10:40:12.000Z"),
        ];
        assert_eq!(sent.len(), expected.len());
        for ((topic, payload, retain), (want_topic, want_payload)) in sent.iter().zip(expected) {
            assert_eq!(topic, want_topic);
            assert_eq!(payload, want_payload);
            assert!(*retain);
        }
    }

    #[test]
    fn publishes_local_flag_as_zero_or_one() {
        let publisher = Publisher::new(Recorder::default(), "site");
        let stats = LocalStats {
            rx_count: 7,
            tx_count: 0,
            connected: false,
            timestamp: at(),
        };
        publisher.publish_local(&stats).unwrap();

        let sent = publisher.bus().0.lock().unwrap().clone();
        let topics: Vec<&str> = sent.iter().map(|(t, _, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec!["site/local/rx_count", "site/local/tx_count", "site/local/connected", "site/local/last_update"]
        );
        assert_eq!(sent[0].1, "7");
        assert_eq!(sent[2].1, "0");
    }
}
