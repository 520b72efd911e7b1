//! Environment-backed configuration for `roomline-smoke`.

use std::{env, error::Error, fmt};

use roomline_core::ControllerConfig;

const DEFAULT_OWN_USER_ID: &str = "@me:localhost";
const DEFAULT_PAGE_SIZE: u16 = 10;
const DEFAULT_ROOMS: [&str; 2] = ["!lobby:localhost", "!dev:localhost"];

/// Scenario configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// User the in-memory feed sends as; drives `Sent` classification.
    pub own_user_id: String,
    /// Initial backward page size requested on every room switch.
    pub page_size: u16,
    /// When set, pagination is limited to locally stored history.
    pub store_only: bool,
    /// Rooms switched through, in order.
    pub rooms: Vec<String>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let own_user_id = optional_trimmed_env("ROOMLINE_USER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_OWN_USER_ID.to_owned());
        let page_size = parse_optional_u16("ROOMLINE_PAGE_SIZE", &mut lookup)?
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let store_only = parse_optional_bool("ROOMLINE_STORE_ONLY", &mut lookup)?.unwrap_or(false);
        let rooms = optional_trimmed_env("ROOMLINE_ROOMS", &mut lookup)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|room| !room.is_empty())
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .filter(|rooms| !rooms.is_empty())
            .unwrap_or_else(|| DEFAULT_ROOMS.iter().map(|room| (*room).to_owned()).collect());

        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ROOMLINE_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            own_user_id,
            page_size,
            store_only,
            rooms,
        })
    }

    /// Controller settings derived from this scenario.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            own_user_id: Some(self.own_user_id.clone()),
            initial_page_size: self.page_size,
            allow_network_fetch: !self.store_only,
        }
    }
}

/// Errors produced while parsing smoke configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(key: &'static str, lookup: &mut F) -> Result<Option<bool>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true, false, 1 or 0".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config_from_pairs(&[]).expect("empty config should parse");
        assert_eq!(cfg.own_user_id, DEFAULT_OWN_USER_ID);
        assert_eq!(cfg.page_size, DEFAULT_PAGE_SIZE);
        assert!(!cfg.store_only);
        assert_eq!(cfg.rooms, vec!["!lobby:localhost", "!dev:localhost"]);

        let controller = cfg.controller_config();
        assert_eq!(controller.own_user_id.as_deref(), Some(DEFAULT_OWN_USER_ID));
        assert!(controller.allow_network_fetch);
    }

    #[test]
    fn parses_overrides() {
        let cfg = config_from_pairs(&[
            ("ROOMLINE_USER", " @alice:example.org "),
            ("ROOMLINE_PAGE_SIZE", "25"),
            ("ROOMLINE_STORE_ONLY", "1"),
            ("ROOMLINE_ROOMS", "!a:example.org, ,!b:example.org"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.own_user_id, "@alice:example.org");
        assert_eq!(cfg.page_size, 25);
        assert!(cfg.store_only);
        assert_eq!(cfg.rooms, vec!["!a:example.org", "!b:example.org"]);
        assert!(!cfg.controller_config().allow_network_fetch);
    }

    #[test]
    fn rejects_zero_page_size() {
        let err = config_from_pairs(&[("ROOMLINE_PAGE_SIZE", "0")])
            .expect_err("zero page size should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ROOMLINE_PAGE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from_pairs(&[("ROOMLINE_PAGE_SIZE", "abc")])
            .expect_err("invalid page size should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ROOMLINE_PAGE_SIZE",
                ..
            }
        ));

        let err = config_from_pairs(&[("ROOMLINE_STORE_ONLY", "maybe")])
            .expect_err("invalid flag should fail");
        assert_eq!(
            err.to_string(),
            "invalid ROOMLINE_STORE_ONLY='maybe': expected true, false, 1 or 0"
        );
    }

    #[test]
    fn blank_room_list_falls_back_to_defaults() {
        let cfg = config_from_pairs(&[("ROOMLINE_ROOMS", " , ")]).expect("config should parse");
        assert_eq!(cfg.rooms.len(), DEFAULT_ROOMS.len());
    }
}
