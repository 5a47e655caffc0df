use anyhow::{bail, Context, Result};
use gwpub::{logging, platform, AppConfig, Service};
use std::path::PathBuf;

#[derive(Debug)]
struct Cli {
    config_path: Option<PathBuf>,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config_path: Option<PathBuf> = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                    config_path = Some(value.into());
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: gwpub [--config <path>]\n\
                         --config <path>   Optional TOML configuration; environment variables override it\n\n\
                         Environment: MQTT_BROKER, MQTT_PORT, MQTT_USER, MQTT_PASS, MQTT_TOPIC_PREFIX,\n\
                         BASICSTATION_CONTAINER, DEBUG, TTN_CLUSTER, TTN_GATEWAY_ID, TTN_API_KEY"
                    );
                    std::process::exit(0);
                }
                other => bail!("unknown argument '{other}'"),
            }
        }

        Ok(Self { config_path })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse()?;

    let config = AppConfig::resolve(cli.config_path.as_deref()).context("unable to load configuration")?;

    logging::init(&config)?;
    platform::log_platform_guidance();

    Service::new(config).run().await
}
