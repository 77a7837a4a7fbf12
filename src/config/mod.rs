mod polling;
mod raw;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;

pub use self::raw::ConfigParseError;
use self::raw::RawConfig;
pub(crate) use self::polling::PollingConfig;

/// Validated engine configuration, shared by the taskmaster and the
/// read-side subcommands.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) namespace: String,
    pub(crate) filer: FilerConfig,
    pub(crate) storage_class: Option<String>,
    pub(crate) polling: PollingConfig,
    pub(crate) labels_file: PathBuf,
    pub(crate) executor_backoff_limit: Option<i32>,
}

/// How the input and output transfer Jobs are built.
#[derive(Debug, Clone)]
pub(crate) struct FilerConfig {
    pub(crate) image: String,
    pub(crate) image_pull_policy: ImagePullPolicy,
    pub(crate) backoff_limit: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl ImagePullPolicy {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::IfNotPresent => "IfNotPresent",
            Self::Never => "Never",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read config file '{path}'.\n{source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file.\n{0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config.\n{0}")]
    Invalid(#[from] ConfigParseError),
}

impl Config {
    #[instrument("load_config")]
    pub(crate) async fn new_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let raw_text =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        let raw: RawConfig = serde_yaml::from_str(&raw_text)?;
        Ok(Config::try_from(raw)?)
    }
}
