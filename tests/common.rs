#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use gwpub::{docker::LogSource, publisher::Bus, ttn::StatusSource};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

pub const RX_LINE: &str =
    "2025-12-07 10:40:12.345 [S2E:VERB] RX 868.1MHz DR5 SF7/BW125 snr=9.5 rssi=-43 - updf mhdr=40";
pub const TX_LINE: &str = "2025-12-07 10:40:13.001 [S2E:VERB] TX ::0 diid=1 [ant#0] - dntxed";

#[derive(Clone, Default)]
pub struct FakeLogs {
    pub lines: Vec<String>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeLogs {
    pub fn with_lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for FakeLogs {
    async fn tail(&self, _name: &str, max_lines: usize) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let skip = self.lines.len().saturating_sub(max_lines);
        self.lines[skip..].to_vec()
    }
}

#[derive(Clone, Default)]
pub struct FakeStatus {
    pub document: Option<Value>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeStatus {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for FakeStatus {
    async fn fetch(&self) -> Option<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.document.clone()
    }
}

/// Records publishes; topics under `fail_prefix` are rejected.
#[derive(Default)]
pub struct RecordingBus {
    pub sent: Mutex<Vec<(String, String, bool)>>,
    pub fail_prefix: Option<String>,
}

impl RecordingBus {
    pub fn failing(prefix: &str) -> Self {
        Self {
            fail_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    pub fn count(&self, topic: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .count()
    }

    pub fn last(&self, topic: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload.clone())
    }
}

impl Bus for RecordingBus {
    fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        if let Some(prefix) = &self.fail_prefix {
            if topic.starts_with(prefix.as_str()) {
                bail!("bus rejected {topic}");
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, retain));
        Ok(())
    }
}
