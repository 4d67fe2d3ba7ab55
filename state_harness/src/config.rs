//! Run options: which fork and variants to run, and what to emit.

use std::{env, path::PathBuf, str::FromStr};

use dotenvy::dotenv;
use serde::{de::Error as _, Deserialize, Deserializer};

use crate::{context::Fork, error::HarnessError, fixture::Selectors};

const ENV_PREFIX: &str = "HARNESS_";

/// Everything an invocation of the harness can be told.
///
/// Loadable from JSON or from `HARNESS_*` environment variables (a `.env`
/// file is honoured).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RunOptions {
    #[serde(deserialize_with = "fork_name")]
    pub fork: Fork,
    /// Only run post cases with these variant indexes.
    #[serde(flatten)]
    pub selectors: Selectors,
    /// Write a test vector per passing case.
    pub emit_artifact: bool,
    /// Log engine trace records.
    pub trace: bool,
    pub artifact_dir: PathBuf,
    /// Execution script named in emitted test vectors.
    pub execution_script: String,
    /// Upper bound on cases running at once in concurrent runs.
    pub max_concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fork: Fork::Istanbul,
            selectors: Selectors::default(),
            emit_artifact: false,
            trace: false,
            artifact_dir: PathBuf::from("test-vectors"),
            execution_script: "turbo-mpt.wasm".to_owned(),
            max_concurrency: 4,
        }
    }
}

impl RunOptions {
    /// Reads `HARNESS_FORK`, `HARNESS_DATA`, `HARNESS_GAS`, `HARNESS_VALUE`,
    /// `HARNESS_EMIT_ARTIFACT`, `HARNESS_TRACE`, `HARNESS_ARTIFACT_DIR`,
    /// `HARNESS_EXECUTION_SCRIPT` and `HARNESS_MAX_CONCURRENCY`, falling back
    /// to the defaults for unset ones.
    pub fn from_env() -> Result<Self, HarnessError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Like [`RunOptions::from_env`], with variables (minus the prefix) looked
    /// up through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HarnessError> {
        let mut opts = Self::default();
        if let Some(fork) = lookup("FORK") {
            opts.fork = parse("FORK", &fork)?;
        }
        if let Some(data) = lookup("DATA") {
            opts.selectors.data = Some(parse("DATA", &data)?);
        }
        if let Some(gas) = lookup("GAS") {
            opts.selectors.gas = Some(parse("GAS", &gas)?);
        }
        if let Some(value) = lookup("VALUE") {
            opts.selectors.value = Some(parse("VALUE", &value)?);
        }
        if let Some(flag) = lookup("EMIT_ARTIFACT") {
            opts.emit_artifact = parse_flag("EMIT_ARTIFACT", &flag)?;
        }
        if let Some(flag) = lookup("TRACE") {
            opts.trace = parse_flag("TRACE", &flag)?;
        }
        if let Some(dir) = lookup("ARTIFACT_DIR") {
            opts.artifact_dir = PathBuf::from(dir);
        }
        if let Some(script) = lookup("EXECUTION_SCRIPT") {
            opts.execution_script = script;
        }
        if let Some(n) = lookup("MAX_CONCURRENCY") {
            opts.max_concurrency = parse("MAX_CONCURRENCY", &n)?;
        }
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        let opts: Self =
            serde_json::from_str(json).map_err(|e| HarnessError::Config(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    fn validate(&self) -> Result<(), HarnessError> {
        if self.max_concurrency == 0 {
            return Err(HarnessError::Config(
                "max_concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, HarnessError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        HarnessError::Config(format!("{}{}={:?}: {}", ENV_PREFIX, name, raw, e))
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, HarnessError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(HarnessError::Config(format!(
            "{}{}={:?} is not a boolean",
            ENV_PREFIX, name, raw
        ))),
    }
}

fn fork_name<'de, D: Deserializer<'de>>(it: D) -> Result<Fork, D::Error> {
    let s = String::deserialize(it)?;
    Fork::from_str(&s).map_err(|e| D::Error::custom(format!("unknown fork {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_the_defaults() {
        assert_eq!(RunOptions::from_lookup(lookup(&[])), Ok(RunOptions::default()));
    }

    #[test]
    fn variables_override_the_defaults() {
        let opts = RunOptions::from_lookup(lookup(&[
            ("FORK", "EIP158"),
            ("DATA", "2"),
            ("EMIT_ARTIFACT", "yes"),
            ("ARTIFACT_DIR", "/tmp/vectors"),
        ]))
        .unwrap();
        assert_eq!(opts.fork, Fork::SpuriousDragon);
        assert_eq!(opts.selectors.data, Some(2));
        assert_eq!(opts.selectors.gas, None);
        assert!(opts.emit_artifact);
        assert!(!opts.trace);
        assert_eq!(opts.artifact_dir, PathBuf::from("/tmp/vectors"));
    }

    #[test]
    fn bad_values_are_config_errors() {
        for vars in [
            [("FORK", "Prague")],
            [("GAS", "-1")],
            [("TRACE", "maybe")],
            [("MAX_CONCURRENCY", "0")],
        ] {
            assert!(matches!(
                RunOptions::from_lookup(lookup(&vars)),
                Err(HarnessError::Config(_))
            ));
        }
    }

    #[test]
    fn json_options_are_partial() {
        let opts =
            RunOptions::from_json(r#"{"fork": "Byzantium", "value": 1, "trace": true}"#).unwrap();
        assert_eq!(opts.fork, Fork::Byzantium);
        assert_eq!(opts.selectors.value, Some(1));
        assert!(opts.trace);
        assert_eq!(opts.max_concurrency, 4);
    }
}
