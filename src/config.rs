use std::time::Duration;

use crate::vulkan_core::{FeatureLevel, WaitMode};

pub const ENV_ADAPTER: &str = "DISPATCH_ADAPTER";
pub const ENV_FEATURE_LEVEL: &str = "DISPATCH_FEATURE_LEVEL";
pub const ENV_VALIDATION: &str = "DISPATCH_VALIDATION";
pub const ENV_WAIT: &str = "DISPATCH_WAIT";
pub const ENV_TIMEOUT_MS: &str = "DISPATCH_TIMEOUT_MS";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Invalid value {value:?} for {key}: {reason}")]
pub struct Error {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Index into the enumerated adapters, `0` being the first one reported.
    pub adapter: usize,
    pub feature_level: FeatureLevel,
    /// Enable the validation layer if it is installed.
    pub validation: bool,
    pub wait: WaitMode,
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            feature_level: FeatureLevel::V1_2,
            validation: true,
            wait: WaitMode::Blocking,
            timeout: Duration::from_secs(10),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from the defaults, overridden by whatever `lookup`
    /// returns for the `DISPATCH_*` keys.
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_ADAPTER) {
            config.adapter = parse(ENV_ADAPTER, value, |v| v.parse::<usize>())?;
        }
        if let Some(value) = lookup(ENV_FEATURE_LEVEL) {
            config.feature_level = parse(ENV_FEATURE_LEVEL, value, |v| v.parse::<FeatureLevel>())?;
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            config.validation = parse(ENV_VALIDATION, value, parse_bool)?;
        }
        if let Some(value) = lookup(ENV_WAIT) {
            config.wait = parse(ENV_WAIT, value, |v| v.parse::<WaitMode>())?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(parse(ENV_TIMEOUT_MS, value, |v| {
                v.parse::<u64>()
            })?);
        }

        log::debug!("Using {config:?}");
        Ok(config)
    }
}

fn parse<T, E: ToString>(
    key: &'static str,
    value: String,
    f: impl FnOnce(&str) -> std::result::Result<T, E>,
) -> Result<T> {
    f(value.trim()).map_err(|err| Error {
        key,
        reason: err.to_string(),
        value,
    })
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected a boolean".to_owned()),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = RunConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.adapter, 0);
        assert_eq!(config.feature_level, FeatureLevel::V1_2);
        assert_eq!(config.wait, WaitMode::Blocking);
    }

    #[test]
    fn overrides_from_lookup() {
        let config = RunConfig::from_lookup(lookup(&[
            (ENV_ADAPTER, "1"),
            (ENV_FEATURE_LEVEL, "1.3"),
            (ENV_VALIDATION, "off"),
            (ENV_WAIT, "spin"),
            (ENV_TIMEOUT_MS, " 250 "),
        ]))
        .unwrap();
        assert_eq!(
            config,
            RunConfig {
                adapter: 1,
                feature_level: FeatureLevel::V1_3,
                validation: false,
                wait: WaitMode::Spin,
                timeout: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn invalid_value_names_key() {
        let err = RunConfig::from_lookup(lookup(&[(ENV_VALIDATION, "maybe")])).unwrap_err();
        assert_eq!(err.key, ENV_VALIDATION);
        insta::assert_snapshot!(err.to_string(), @r###"Invalid value "maybe" for DISPATCH_VALIDATION: expected a boolean"###);
    }

    #[test]
    fn invalid_feature_level() {
        let err = RunConfig::from_lookup(lookup(&[(ENV_FEATURE_LEVEL, "twelve")])).unwrap_err();
        assert_eq!(err.key, ENV_FEATURE_LEVEL);
        assert_eq!(err.value, "twelve");
    }
}
