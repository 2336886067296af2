//! Layered configuration loading.
//!
//! Values are resolved in order: `T::default()`, then an optional file, then
//! environment variables named `<PREFIX>__<SECTION>__<KEY>`.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::errors::{Error, Result};

/// Load a configuration of type `T`.
///
/// A missing file is not an error: defaults and environment still apply.
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    let defaults = ::config::Config::try_from(&T::default())?;

    let mut builder = ::config::Config::builder().add_source(defaults);

    if let Some(path) = path {
        debug!("Loading configuration file {}", path.display());
        builder = builder.add_source(::config::File::from(path).required(false));
    }

    builder = builder.add_source(
        ::config::Environment::with_prefix(env_prefix)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build()?;
    settings.try_deserialize::<T>().map_err(Error::from)
}

/// Render a configuration as TOML, e.g. to log the effective settings.
pub fn render_config<T: Serialize>(config: &T) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        threads: usize,
        name: String,
        nested: Nested,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Nested {
        tick_ms: u64,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self { threads: 4, name: "default".to_string(), nested: Nested::default() }
        }
    }

    impl Default for Nested {
        fn default() -> Self {
            Self { tick_ms: 10 }
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg: Sample = load_config(None, "INFRA_TEST_NOFILE").unwrap();
        assert_eq!(cfg, Sample::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "threads = 2\n[nested]\ntick_ms = 20").unwrap();

        let cfg: Sample = load_config(Some(file.path()), "INFRA_TEST_FILE").unwrap();
        assert_eq!(cfg.threads, 2);
        assert_eq!(cfg.nested.tick_ms, 20);
        assert_eq!(cfg.name, "default");
    }

    #[test]
    fn test_render_config() {
        let rendered = render_config(&Sample::default()).unwrap();
        assert!(rendered.contains("threads = 4"));
        assert!(rendered.contains("[nested]"));
    }
}
