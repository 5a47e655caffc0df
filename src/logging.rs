use anyhow::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// Transport crates that flood the output at debug level with per-packet
/// and per-connection events.
const QUIET_CRATES: [&str; 4] = ["rumqttc", "hyper", "hyper_util", "reqwest"];

/// `RUST_LOG` wins when set. Otherwise the configured level applies, with the
/// MQTT and HTTP stacks held at `info` unless named explicitly.
pub fn init(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(&config.log_level)))?;
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(config.debug)
        .with_file(config.debug)
        .with_line_number(config.debug)
        .try_init()
        .map_err(Error::msg)?;
    Ok(())
}

fn directives(level: &str) -> String {
    let level = level.trim();
    let verbose = matches!(level.to_ascii_lowercase().as_str(), "debug" | "trace");
    if !verbose {
        return level.to_string();
    }
    let mut directives = vec![level.to_string()];
    for krate in QUIET_CRATES {
        if !level.contains(krate) {
            directives.push(format!("{krate}=info"));
        }
    }
    directives.join(",")
}
