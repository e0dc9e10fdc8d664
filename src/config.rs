use serde::Deserialize;
use std::{fs, net::SocketAddr, path::Path, time::Duration};

use crate::{Error, Result};

pub const DEFAULT_REGISTRY_URL: &str = "https://graphql.api.apollographql.com/api/graphql";
pub const DEFAULT_CLIENT_NAME: &str = "graphos-resources";

/// Runtime settings shared by every invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub registry_url: String,
    pub client_name: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub request_timeout: Duration,
    pub listen: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

// On-disk shape; every field optional so a file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    registry_url: Option<String>,
    client_name: Option<String>,
    poll_interval_secs: Option<u64>,
    max_wait_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    listen: Option<SocketAddr>,
}

impl Settings {
    /// Defaults overlaid with the YAML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let file: SettingsFile = serde_yaml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse settings: {}", e)))?;
        let mut settings = Settings::default();
        if let Some(url) = file.registry_url {
            settings.registry_url = url;
        }
        if let Some(name) = file.client_name {
            settings.client_name = name;
        }
        if let Some(secs) = file.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.max_wait_secs {
            settings.max_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(listen) = file.listen {
            settings.listen = listen;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry_url.is_empty() {
            return Err(Error::config("registry_url must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.max_wait < self.poll_interval {
            return Err(Error::config(
                "max wait must be at least one poll interval",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_poll_every_five_seconds_for_five_minutes() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.max_wait, Duration::from_secs(300));
        assert_eq!(settings.registry_url, DEFAULT_REGISTRY_URL);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let settings = Settings::from_yaml(
            "registry_url: http://localhost:4000/graphql\nmax_wait_secs: 60\n",
        )
        .unwrap();
        assert_eq!(settings.registry_url, "http://localhost:4000/graphql");
        assert_eq!(settings.max_wait, Duration::from_secs(60));
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.client_name, DEFAULT_CLIENT_NAME);
    }

    #[test]
    fn unknown_keys_and_bad_durations_are_rejected() {
        let err = Settings::from_yaml("registry: nope\n").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");

        let err = Settings::from_yaml("poll_interval_secs: 10\nmax_wait_secs: 5\n").unwrap_err();
        assert!(err.to_string().contains("max wait"));
    }
}
