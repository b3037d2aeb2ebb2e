//! Configuration management for the fleet exchange
//!
//! Resolution order is env > toml > default.

pub mod file;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::router::RouterConfig;
use crate::{Error, Result};

pub use file::{FleetConfigFile, config_file_path};

/// Default port of the remote UI endpoint
pub const DEFAULT_PORT: u16 = 18790;

/// Fleet exchange configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Remote UI endpoint configuration
    pub api: ApiServerConfig,

    /// Router tuning
    pub router: RouterSettings,
}

/// Remote UI endpoint configuration
#[derive(Debug, Clone, Serialize)]
pub struct ApiServerConfig {
    /// Serve the endpoint at all
    pub enabled: bool,

    /// Address to bind
    pub bind: IpAddr,

    /// Port to listen on
    pub port: u16,
}

impl ApiServerConfig {
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Router settings as configured
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RouterSettings {
    pub mailbox_capacity: usize,
    pub group_sweep_secs: u64,
}

impl RouterSettings {
    #[must_use]
    pub const fn router_config(&self) -> RouterConfig {
        RouterConfig {
            mailbox_capacity: self.mailbox_capacity,
            group_sweep: Duration::from_secs(self.group_sweep_secs),
        }
    }
}

impl Config {
    /// Load configuration from the standard file path and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if a resolved value is invalid
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading the TOML overlay from `path` when given
    ///
    /// # Errors
    ///
    /// Returns an error if a resolved value is invalid
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let fc = path.map_or_else(file::load_config_file, file::load_config_from);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns an error if a resolved value is invalid
    pub fn resolve(fc: FleetConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind = match env("FLEETX_BIND").or(fc.api.bind) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("invalid bind address {raw:?}: {e}")))?,
            None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };

        let api = ApiServerConfig {
            enabled: env("FLEETX_API_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.api.enabled)
                .unwrap_or(true),
            bind,
            port: env("FLEETX_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.api.port)
                .unwrap_or(DEFAULT_PORT),
        };

        let router = RouterSettings {
            mailbox_capacity: env("FLEETX_MAILBOX_CAPACITY")
                .and_then(|s| s.parse().ok())
                .or(fc.router.mailbox_capacity)
                .unwrap_or(256),
            group_sweep_secs: env("FLEETX_GROUP_SWEEP_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.router.group_sweep_secs)
                .unwrap_or(10),
        };

        if router.mailbox_capacity == 0 {
            return Err(Error::Config("mailbox capacity must be positive".to_string()));
        }
        if router.group_sweep_secs == 0 {
            return Err(Error::Config("group sweep interval must be positive".to_string()));
        }

        Ok(Self { api, router })
    }
}
