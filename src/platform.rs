const TEMPLATE: &str = r#"[Unit]
Description=Gateway status MQTT publisher
After=network-online.target docker.service
Wants=network-online.target

[Service]
EnvironmentFile=/etc/gwpub/gwpub.env
ExecStart=/usr/local/bin/gwpub
Restart=on-failure
RestartSec=10

[Install]
WantedBy=multi-user.target
"#;

pub fn platform_template() -> &'static str {
    TEMPLATE
}

pub fn log_platform_guidance() {
    tracing::debug!(
        template = platform_template(),
        "systemd unit template available"
    );
}
