use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt_broker: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user: String,
    #[serde(default)]
    pub mqtt_pass: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ttn_cluster: String,
    #[serde(default)]
    pub ttn_gateway_id: String,
    #[serde(default)]
    pub ttn_api_key: String,
    #[serde(default = "default_local_interval_secs")]
    pub local_interval_secs: u64,
    #[serde(default = "default_remote_interval_secs")]
    pub remote_interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "basicstation-mqtt-publisher".to_string()
}

fn default_topic_prefix() -> String {
    "gateways".to_string()
}

fn default_container() -> String {
    "basicstation".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_local_interval_secs() -> u64 {
    5
}

fn default_remote_interval_secs() -> u64 {
    10
}

fn default_max_age_secs() -> u64 {
    crate::ttn::DEFAULT_MAX_AGE_SECS
}

fn default_log_tail_lines() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt_broker: String::new(),
            mqtt_port: default_mqtt_port(),
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            container: default_container(),
            debug: false,
            log_level: default_log_level(),
            ttn_cluster: String::new(),
            ttn_gateway_id: String::new(),
            ttn_api_key: String::new(),
            local_interval_secs: default_local_interval_secs(),
            remote_interval_secs: default_remote_interval_secs(),
            max_age_secs: default_max_age_secs(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

impl AppConfig {
    /// Builds the runtime configuration: optional TOML file first, then the
    /// process environment on top.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read configuration from {}", path_ref.display()))?;
        let config: Self = toml::from_str(&raw).with_context(|| {
            format!("failed to parse configuration from {}", path_ref.display())
        })?;
        Ok(config)
    }

    /// Overrides fields from environment-style lookups. Unset keys keep the
    /// current value; numeric keys that fail to parse are an error.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, field: &mut String| {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        };
        text("MQTT_BROKER", &mut self.mqtt_broker);
        text("MQTT_USER", &mut self.mqtt_user);
        text("MQTT_PASS", &mut self.mqtt_pass);
        text("MQTT_CLIENT_ID", &mut self.client_id);
        text("MQTT_TOPIC_PREFIX", &mut self.topic_prefix);
        text("BASICSTATION_CONTAINER", &mut self.container);
        text("TTN_CLUSTER", &mut self.ttn_cluster);
        text("TTN_GATEWAY_ID", &mut self.ttn_gateway_id);
        text("TTN_API_KEY", &mut self.ttn_api_key);

        parse_env(&lookup, "MQTT_PORT", &mut self.mqtt_port)?;
        parse_env(&lookup, "LOCAL_INTERVAL_SECS", &mut self.local_interval_secs)?;
        parse_env(&lookup, "TTN_INTERVAL_SECS", &mut self.remote_interval_secs)?;
        parse_env(&lookup, "TTN_MAX_AGE_SECS", &mut self.max_age_secs)?;
        parse_env(&lookup, "LOG_TAIL_LINES", &mut self.log_tail_lines)?;

        if let Some(flag) = lookup("DEBUG") {
            let flag = flag.trim().to_ascii_lowercase();
            self.debug = flag == "true" || flag == "1";
        }
        match lookup("LOG_LEVEL") {
            Some(level) => self.log_level = level,
            None if self.debug => self.log_level = "debug".to_string(),
            None => {}
        }

        if self.topic_prefix.trim().is_empty() {
            self.topic_prefix = default_topic_prefix();
        }
        Ok(self)
    }

    /// Remote reporting is optional; it only runs when all three identifiers are set.
    pub fn ttn_enabled(&self) -> bool {
        !self.ttn_cluster.is_empty()
            && !self.ttn_gateway_id.is_empty()
            && !self.ttn_api_key.is_empty()
    }

    pub fn mqtt_credentials(&self) -> Option<(&str, &str)> {
        if self.mqtt_user.is_empty() || self.mqtt_pass.is_empty() {
            None
        } else {
            Some((&self.mqtt_user, &self.mqtt_pass))
        }
    }
}

fn parse_env<F, T>(lookup: &F, key: &str, field: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *field = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: '{raw}'"))?;
    }
    Ok(())
}
