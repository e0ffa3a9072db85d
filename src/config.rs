//! Listener configuration from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::Error;

/// Environment variable holding the port to listen on.
pub const PORT_VAR: &str = "SERVICE_PORT";

/// Port used when [`PORT_VAR`] is unset or empty.
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub service_name: String,
    pub host: IpAddr,
    pub port: u16,
}

impl Config {
    /// Defaults for `service_name`: all interfaces, [`DEFAULT_PORT`].
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }

    /// Reads [`PORT_VAR`] from the process environment.
    pub fn from_env(service_name: impl Into<String>) -> Result<Self, Error> {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Config::from_env) with a custom variable source.
    pub fn from_lookup(
        service_name: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let mut config = Self::new(service_name);
        if let Some(raw) = lookup(PORT_VAR).filter(|v| !v.trim().is_empty()) {
            config.port = raw.trim().parse().map_err(|e| {
                Error::Config(format!("{PORT_VAR} must be a port number, got {raw:?}: {e}"))
            })?;
        }
        Ok(config)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
