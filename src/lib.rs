pub mod config;
pub mod docker;
pub mod logging;
pub mod metrics;
pub mod mqtt;
pub mod platform;
pub mod publisher;
pub mod scheduler;
pub mod service;
pub mod station;
pub mod ttn;

pub use config::AppConfig;
pub use service::Service;
