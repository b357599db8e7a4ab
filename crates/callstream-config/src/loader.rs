//! YAML loading with environment substitution.
//!
//! # Design
//! - `${NAME}` and `${NAME:-default}` references are resolved before parsing,
//!   so any scalar in the document may come from the environment.
//! - The variable lookup is injected; production passes `std::env::var`, tests
//!   pass a closure over a fixed map.

use std::path::Path;

use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::PipelineConfig;
use crate::validate::validate;

/// Environment variable consulted when `project_id` is left empty.
pub const PROJECT_ID_ENV: &str = "CALLSTREAM_PROJECT_ID";

static ENV_REFERENCE: OnceCell<Regex> = OnceCell::new();

fn env_reference() -> ConfigResult<&'static Regex> {
    ENV_REFERENCE
        .get_or_try_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}"))
        .map_err(|source| ConfigError::Pattern { source })
}

/// Load, substitute, parse, and validate the configuration at `path` using the
/// process environment.
///
/// # Errors
///
/// Returns an error when the file cannot be read, a referenced variable is
/// missing, the YAML does not match the model, or validation fails.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<PipelineConfig> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// Load the configuration at `path`, resolving variables through `lookup`.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with<F>(path: impl AsRef<Path>, lookup: F) -> ConfigResult<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded configuration document");
    parse_document(&raw, Some(path), lookup)
}

/// Parse and validate an in-memory configuration document.
///
/// # Errors
///
/// Returns an error when substitution, parsing, or validation fails.
pub fn parse_config<F>(raw: &str, lookup: F) -> ConfigResult<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    parse_document(raw, None, lookup)
}

fn parse_document<F>(raw: &str, path: Option<&Path>, lookup: F) -> ConfigResult<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let resolved = substitute_env(raw, &lookup)?;
    let mut config: PipelineConfig =
        serde_yaml::from_str(&resolved).map_err(|source| ConfigError::Parse {
            path: path.map(Path::to_path_buf),
            source,
        })?;
    if config.project_id.trim().is_empty()
        && let Some(project) = lookup(PROJECT_ID_ENV)
    {
        config.project_id = project;
    }
    validate(&config)?;
    Ok(config)
}

/// Replace `${NAME}` and `${NAME:-default}` references in `raw`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] for a reference with no value and no
/// default.
pub fn substitute_env<F>(raw: &str, lookup: F) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = env_reference()?;
    let mut output = String::with_capacity(raw.len());
    let mut cursor = 0;
    for captures in pattern.captures_iter(raw) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        output.push_str(&raw[cursor..whole.start()]);
        let value = match (lookup(name.as_str()), captures.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                return Err(ConfigError::MissingEnv {
                    name: name.as_str().to_string(),
                });
            }
        };
        output.push_str(&value);
        cursor = whole.end();
    }
    output.push_str(&raw[cursor..]);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn substitutes_values_and_defaults() -> anyhow::Result<()> {
        let vars = env(&[("BUCKET", "calls")]);
        let out = substitute_env("root: /${BUCKET}/${SUFFIX:-in}", |name| {
            vars.get(name).cloned()
        })?;
        assert_eq!(out, "root: /calls/in");
        Ok(())
    }

    #[test]
    fn environment_wins_over_default() -> anyhow::Result<()> {
        let vars = env(&[("LEVEL", "debug")]);
        let out = substitute_env("${LEVEL:-info}", |name| vars.get(name).cloned())?;
        assert_eq!(out, "debug");
        Ok(())
    }

    #[test]
    fn missing_variable_without_default_fails() {
        let result = substitute_env("endpoint: ${NOPE}", |_| None);
        match result {
            Err(ConfigError::MissingEnv { name }) => assert_eq!(name, "NOPE"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn text_without_references_is_unchanged() -> anyhow::Result<()> {
        let raw = "plain: $HOME and {braces}";
        assert_eq!(substitute_env(raw, |_| None)?, raw);
        Ok(())
    }

    #[test]
    fn empty_project_id_falls_back_to_environment() -> anyhow::Result<()> {
        let vars = env(&[(PROJECT_ID_ENV, "from-env")]);
        let raw = r"
store:
  input_root: /in
  output_root: /out
recognizer:
  endpoint: https://speech.local
redaction:
  endpoint: https://dlp.local
ingest:
  endpoint: https://insights.local
";
        let config = parse_config(raw, |name| vars.get(name).cloned())?;
        assert_eq!(config.project_id, "from-env");
        Ok(())
    }
}
