//! Conversion configuration
//!
//! Two flags, read from the environment or from a TOML `[autograph]` table:
//!
//! - `strict_conversion`: type and domain issues become errors instead of fallbacks
//! - `ignore_fallbacks`: fallbacks still happen but are not reported

use std::env;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const STRICT_VAR: &str = "AUTOGRAPH_STRICT_CONVERSION";
const IGNORE_VAR: &str = "AUTOGRAPH_IGNORE_FALLBACKS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutographConfig {
    pub strict_conversion: bool,
    pub ignore_fallbacks: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    autograph: AutographConfig,
}

static GLOBAL: Lazy<AutographConfig> = Lazy::new(AutographConfig::from_env);

/// Parse a boolean environment flag
pub fn parse_flag(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn flag_from_env(var: &str) -> bool {
    let Ok(value) = env::var(var) else {
        return false;
    };
    match parse_flag(var, &value) {
        Ok(flag) => flag,
        Err(err) => {
            tracing::warn!(%err, "ignoring configuration flag");
            false
        }
    }
}

impl AutographConfig {
    pub fn strict() -> Self {
        Self {
            strict_conversion: true,
            ..Self::default()
        }
    }

    pub fn quiet() -> Self {
        Self {
            ignore_fallbacks: true,
            ..Self::default()
        }
    }

    /// Read `AUTOGRAPH_STRICT_CONVERSION` and `AUTOGRAPH_IGNORE_FALLBACKS`
    pub fn from_env() -> Self {
        Self {
            strict_conversion: flag_from_env(STRICT_VAR),
            ignore_fallbacks: flag_from_env(IGNORE_VAR),
        }
    }

    /// Parse the `[autograph]` table of a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.autograph)
    }

    /// Process configuration, read from the environment on first use
    pub fn global() -> Self {
        *GLOBAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AutographConfig::default();
        assert!(!config.strict_conversion);
        assert!(!config.ignore_fallbacks);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "1").unwrap());
        assert!(parse_flag("X", " Yes ").unwrap());
        assert!(!parse_flag("X", "off").unwrap());
        let err = parse_flag("X", "maybe").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value \"maybe\" for X: expected a boolean"
        );
    }

    #[test]
    fn test_from_toml() {
        let config = AutographConfig::from_toml_str(
            "[autograph]\nstrict_conversion = true\n",
        )
        .unwrap();
        assert_eq!(config, AutographConfig::strict());

        let empty = AutographConfig::from_toml_str("").unwrap();
        assert_eq!(empty, AutographConfig::default());

        assert!(AutographConfig::from_toml_str("[autograph]\nstrict_conversion = 3\n").is_err());
    }
}
