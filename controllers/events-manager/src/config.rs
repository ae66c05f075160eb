//! Process configuration, read once from the environment.

use crate::error::ControllerError;
use event_sink::NegativeFilter;
use event_sink::server::DEFAULT_EVENTS_SINK_PORT;
use std::env;
use tracing::info;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone)]
pub struct Config {
    /// Prefixes whose addresses are never annotated (`NEGATIVE_ADDRESS_FILTER`)
    pub negative_address_filter: NegativeFilter,
    /// Event sink listener port (`EVENTS_SINK_PORT`)
    pub events_sink_port: u16,
    /// Namespace of the `Server` objects (`WATCH_NAMESPACE`)
    pub namespace: String,
    /// Metrics endpoint port, disabled when unset (`METRICS_PORT`)
    pub metrics_port: Option<u16>,
}

fn parse_port(name: &str, value: &str) -> Result<u16, ControllerError> {
    value
        .trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{} must be a port number, got {:?}: {}", name, value, e)))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let filter = lookup("NEGATIVE_ADDRESS_FILTER").unwrap_or_default();
        let negative_address_filter =
            NegativeFilter::parse(filter.split(',').map(str::trim).filter(|entry| !entry.is_empty()))?;

        let events_sink_port = match lookup("EVENTS_SINK_PORT") {
            Some(port) => parse_port("EVENTS_SINK_PORT", &port)?,
            None => DEFAULT_EVENTS_SINK_PORT,
        };

        let namespace = lookup("WATCH_NAMESPACE")
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let metrics_port = lookup("METRICS_PORT")
            .map(|port| parse_port("METRICS_PORT", &port))
            .transpose()?;

        Ok(Self {
            negative_address_filter,
            events_sink_port,
            namespace,
            metrics_port,
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Events sink port: {}", self.events_sink_port);
        info!("  Namespace: {}", self.namespace);
        info!("  Negative address filter: {:?}", self.negative_address_filter.prefixes());
        match self.metrics_port {
            Some(port) => info!("  Metrics port: {}", port),
            None => info!("  Metrics endpoint: disabled"),
        }
    }
}
