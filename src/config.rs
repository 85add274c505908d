//! Settings read from the environment.
use std::num::NonZeroUsize;

use camino::Utf8PathBuf;

use crate::color::Color;

pub const ENV_VERBOSE: &str = "SHIGOTO_VERBOSE";
pub const ENV_DEBUG: &str = "SHIGOTO_DEBUG";
pub const ENV_MAX_PARALLEL: &str = "SHIGOTO_MAX_PARALLEL";
pub const ENV_ENABLE_COLOR: &str = "SHIGOTO_ENABLE_COLOR";
pub const ENV_TARGET_COLOR: &str = "SHIGOTO_TARGET_COLOR";
pub const ENV_CACHE: &str = "SHIGOTO_CACHE";

/// Engine settings. `Default` is quiet, unbounded and uncolored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Log every target as it starts.
    pub verbose: bool,
    /// Log engine internals.
    pub debug: bool,
    /// Upper bound on task bodies running at the same time.
    pub max_parallel: Option<NonZeroUsize>,
    /// Color target names in log lines.
    pub color: bool,
    /// Color used for target names.
    pub target_color: Color,
    /// Directory for cached build artifacts.
    pub cache: Option<Utf8PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value. Invalid values are reported and replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| match lookup(key) {
            None => false,
            Some(value) => parse_bool(&value).unwrap_or_else(|| {
                tracing::warn!("ignoring {key}={value:?}, expected a boolean");
                false
            }),
        };

        let max_parallel = lookup(ENV_MAX_PARALLEL).and_then(|value| {
            let parsed = value.trim().parse::<NonZeroUsize>().ok();
            if parsed.is_none() {
                tracing::warn!("ignoring {ENV_MAX_PARALLEL}={value:?}, not a positive integer");
            }
            parsed
        });

        let target_color = lookup(ENV_TARGET_COLOR)
            .and_then(|value| match value.parse::<Color>() {
                Ok(color) => Some(color),
                Err(err) => {
                    tracing::warn!("ignoring {ENV_TARGET_COLOR}: {err}");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            verbose: flag(ENV_VERBOSE),
            debug: flag(ENV_DEBUG),
            max_parallel,
            color: flag(ENV_ENABLE_COLOR),
            target_color,
            cache: lookup(ENV_CACHE)
                .filter(|value| !value.is_empty())
                .map(Utf8PathBuf::from),
        }
    }

    /// The cache directory, `~/.shigoto` unless configured otherwise.
    pub fn cache_dir(&self) -> Option<Utf8PathBuf> {
        if let Some(cache) = &self.cache {
            return Some(cache.clone());
        }

        std::env::var("HOME")
            .ok()
            .filter(|home| !home.is_empty())
            .map(|home| Utf8PathBuf::from(home).join(".shigoto"))
    }
}

/// Parses booleans the way command line tools usually accept them.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("f"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn test_empty_env_is_default() {
        assert_eq!(Settings::from_lookup(lookup(&[])), Settings::default());
    }

    #[test]
    fn test_reads_all_variables() {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_VERBOSE, "1"),
            (ENV_DEBUG, "false"),
            (ENV_MAX_PARALLEL, "4"),
            (ENV_ENABLE_COLOR, "true"),
            (ENV_TARGET_COLOR, "BrightMagenta"),
            (ENV_CACHE, "/tmp/cache"),
        ]));

        assert!(settings.verbose);
        assert!(!settings.debug);
        assert_eq!(settings.max_parallel, NonZeroUsize::new(4));
        assert!(settings.color);
        assert_eq!(settings.target_color, Color::BrightMagenta);
        assert_eq!(settings.cache_dir(), Some(Utf8PathBuf::from("/tmp/cache")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_VERBOSE, "loud"),
            (ENV_MAX_PARALLEL, "0"),
            (ENV_TARGET_COLOR, "mauve"),
        ]));

        assert!(!settings.verbose);
        assert_eq!(settings.max_parallel, None);
        assert_eq!(settings.target_color, Color::Cyan);
    }
}
