//! Load a settings object from the config locations.

use std::{env, fmt::Debug, path::PathBuf};

use config::{Config, Environment, File};
use eyre::{eyre, Context, Result};
use serde::de::DeserializeOwned;

/// Prefix of environment variables overriding settings, e.g.
/// `PUSH_CHAIN__RPC_URL`.
pub const ENV_PREFIX: &str = "PUSH";

/// Separates nesting levels in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

/// Comma separated list of extra config files.
pub const CONFIG_FILES_ENV: &str = "CONFIG_FILES";

/// Validated settings built from their raw, freshly deserialized form.
pub trait FromRawConf<T>: Sized {
    /// Check and convert `raw`. Errors name the offending setting.
    fn from_raw_conf(raw: T) -> Result<Self>;
}

/// Where settings are read from, lowest priority first.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    /// Every `*.json` file in this directory, if it exists
    pub config_dir: PathBuf,
    /// Additional files, in order
    pub files: Vec<PathBuf>,
    /// Environment variable prefix
    pub env_prefix: String,
}

impl Default for ConfigSources {
    fn default() -> Self {
        let files = env::var(CONFIG_FILES_ENV)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            config_dir: PathBuf::from("./config"),
            files,
            env_prefix: ENV_PREFIX.to_owned(),
        }
    }
}

/// Deserialize a settings object from the default config locations.
pub fn load_settings<T, R>() -> Result<R>
where
    T: DeserializeOwned + Debug,
    R: FromRawConf<T>,
{
    load_settings_from(&ConfigSources::default())
}

/// Deserialize a settings object from `sources`: the json files of the config
/// directory, then each extra file, then the environment.
pub fn load_settings_from<T, R>(sources: &ConfigSources) -> Result<R>
where
    T: DeserializeOwned + Debug,
    R: FromRawConf<T>,
{
    let mut loaded = vec![];
    let mut builder = Config::builder();

    if sources.config_dir.is_dir() {
        let mut entries = sources
            .config_dir
            .read_dir()
            .context("Failed to open config directory")?
            .collect::<std::io::Result<Vec<_>>>()
            .context("Failed to list config directory")?;
        // merge order must not depend on the file system
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let path = entry.path();
            if path.is_file() && path.extension() == Some("json".as_ref()) {
                loaded.push(path.clone());
                builder = builder.add_source(File::from(path));
            }
        }
    }

    for path in &sources.files {
        if !path.exists() {
            return Err(eyre!(
                "Provided config path via {CONFIG_FILES_ENV} does not exist ({path:?})"
            ));
        }
        if !path.is_file() {
            return Err(eyre!(
                "Provided config path via {CONFIG_FILES_ENV} is not a file ({path:?})"
            ));
        }
        if path.extension() != Some("json".as_ref()) {
            return Err(eyre!(
                "Provided config path via {CONFIG_FILES_ENV} is of an unsupported type ({path:?})"
            ));
        }
        loaded.push(path.clone());
        builder = builder.add_source(File::from(path.as_path()));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(&sources.env_prefix)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()
        .context("Failed to load config sources")?;

    let raw = config.try_deserialize::<T>().map_err(|err| {
        let mut report = eyre!(err).wrap_err("Config deserialization error");
        for path in &loaded {
            report = report.wrap_err(format!("Config loaded: {path:?}"));
        }
        report
    })?;

    R::from_raw_conf(raw)
}
