use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::AppConfig;

pub const PROVIDER_DOMAIN: &str = "cloud.thethings.network";
pub const DEFAULT_MAX_AGE_SECS: u64 = 600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway connection statistics as reported by The Things Stack.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct RemoteStatus {
    pub uplink_count: u64,
    pub downlink_count: u64,
    pub last_uplink_received_at: String,
    pub last_downlink_received_at: String,
    pub connected: bool,
}

/// Source of the raw gateway status document.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// `None` when reporting is disabled or the remote call failed.
    async fn fetch(&self) -> Option<Value>;
}

pub fn cluster_base_url(cluster: &str) -> String {
    format!("https://{cluster}.{PROVIDER_DOMAIN}")
}

pub fn stats_url(base_url: &str, gateway_id: &str) -> String {
    format!(
        "{}/api/v3/gs/gateways/{gateway_id}/connection/stats",
        base_url.trim_end_matches('/')
    )
}

pub struct TtnClient {
    http: reqwest::Client,
    base_url: String,
    cluster: String,
    gateway_id: String,
    api_key: String,
}

impl TtnClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::with_base_url(config, cluster_base_url(&config.ttn_cluster))
    }

    /// Same as [`TtnClient::new`] but against another host, e.g. a private
    /// Things Stack deployment.
    pub fn with_base_url(config: &AppConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build TTN http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            cluster: config.ttn_cluster.clone(),
            gateway_id: config.ttn_gateway_id.clone(),
            api_key: config.ttn_api_key.clone(),
        })
    }

    fn configured(&self) -> bool {
        !(self.cluster.is_empty() || self.gateway_id.is_empty() || self.api_key.is_empty())
    }

    async fn request(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl StatusSource for TtnClient {
    async fn fetch(&self) -> Option<Value> {
        if !self.configured() {
            tracing::debug!("TTN config incomplete, skipping remote stats fetch");
            return None;
        }
        let url = stats_url(&self.base_url, &self.gateway_id);
        match self.request(&url).await {
            Ok(data) => {
                tracing::debug!(gateway = %self.gateway_id, raw = %data, "TTN stats received");
                Some(data)
            }
            Err(err) => {
                tracing::warn!(gateway = %self.gateway_id, url = %url, error = %err, "failed to fetch TTN stats");
                None
            }
        }
    }
}

pub fn normalize(document: Option<&Value>, max_age_secs: u64) -> RemoteStatus {
    normalize_at(document, max_age_secs, Utc::now())
}

/// Maps a raw status document onto [`RemoteStatus`].
///
/// `connected` requires a recorded uplink timestamp. A parseable timestamp
/// must be at most `max_age_secs` old; an unparseable one falls back to
/// "any uplinks seen". Either way zero uplinks means disconnected.
pub fn normalize_at(document: Option<&Value>, max_age_secs: u64, now: DateTime<Utc>) -> RemoteStatus {
    let Some(document) = document else {
        return RemoteStatus::default();
    };

    let uplink_count = counter(document, "uplink_count");
    let downlink_count = counter(document, "downlink_count");
    let last_uplink_received_at = text(document, "last_uplink_received_at");
    let last_downlink_received_at = text(document, "last_downlink_received_at");

    let connected = if last_uplink_received_at.is_empty() {
        false
    } else {
        match DateTime::parse_from_rfc3339(&last_uplink_received_at) {
            Ok(last) => {
                let age = now.signed_duration_since(last.with_timezone(&Utc));
                // a limit beyond TimeDelta's range never expires
                let fresh = i64::try_from(max_age_secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .map_or(true, |limit| age <= limit);
                fresh && uplink_count > 0
            }
            Err(err) => {
                tracing::debug!(
                    value = %last_uplink_received_at,
                    error = %err,
                    "unparseable uplink timestamp, falling back to counter"
                );
                uplink_count > 0
            }
        }
    };

    RemoteStatus {
        uplink_count,
        downlink_count,
        last_uplink_received_at,
        last_downlink_received_at,
        connected,
    }
}

/// Counters arrive as JSON numbers or, for uint64 fields, numeric strings.
fn counter(document: &Value, field: &str) -> u64 {
    match document.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn text(document: &Value, field: &str) -> String {
    document
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
