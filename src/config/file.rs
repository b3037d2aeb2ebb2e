//! TOML configuration file loading
//!
//! Supports `~/.config/fleetx/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FleetConfigFile {
    /// Remote UI endpoint
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Router and group coordinator tuning
    #[serde(default)]
    pub router: RouterFileConfig,
}

/// Remote UI endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    pub enabled: Option<bool>,
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Router configuration
#[derive(Debug, Default, Deserialize)]
pub struct RouterFileConfig {
    /// Capacity of the router's inbound mailbox
    pub mailbox_capacity: Option<usize>,
    /// Empty-group sweep period in seconds
    pub group_sweep_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FleetConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FleetConfigFile {
    config_file_path().map_or_else(FleetConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
pub fn load_config_from(path: &Path) -> FleetConfigFile {
    if !path.exists() {
        return FleetConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FleetConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FleetConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/fleetx/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fleetx").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let parsed: FleetConfigFile = toml::from_str(
            r"
            [router]
            group_sweep_secs = 3
            ",
        )
        .unwrap();

        assert_eq!(parsed.router.group_sweep_secs, Some(3));
        assert_eq!(parsed.router.mailbox_capacity, None);
        assert_eq!(parsed.api.port, None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let parsed = load_config_from(Path::new("/nonexistent/fleetx/config.toml"));
        assert!(parsed.api.enabled.is_none());
    }
}
