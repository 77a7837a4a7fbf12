use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use super::{Config, FilerConfig, ImagePullPolicy};
use crate::config::polling::PollingConfig;

/// Default downward API mount of the taskmaster pod's own labels.
const DEFAULT_LABELS_FILE: &str = "/podinfo/labels";

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
pub(super) struct RawConfig {
    /// Namespace every task object lives in.
    pub(super) namespace: String,

    pub(super) filer: RawFilerConfig,

    /// Storage class requested for task volumes. Cluster default when unset.
    #[serde(default)]
    pub(super) storage_class: Option<String>,

    #[serde(default)]
    pub(super) polling: PollingConfig,

    /// File carrying the taskmaster pod's labels via the downward API.
    #[serde(default)]
    pub(super) labels_file: Option<PathBuf>,

    /// Retry budget patched onto executor Jobs. Manifest value when unset.
    #[serde(default)]
    pub(super) executor_backoff_limit: Option<i32>,
}

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
pub(super) struct RawFilerConfig {
    /// Image reference of the transfer container, tag included.
    ///
    /// Example: "ghcr.io/example/task-filer:1.4"
    pub(super) image: String,

    /// One of "Always", "IfNotPresent" or "Never".
    #[serde(default)]
    pub(super) image_pull_policy: Option<String>,

    #[serde(default)]
    pub(super) backoff_limit: Option<i32>,
}

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("namespace must not be empty")]
    NamespaceMissing,

    #[error("filer.image must not be empty")]
    FilerImageMissing,

    #[error("Image pull policy '{value}' is not one of Always, IfNotPresent, Never")]
    UnknownImagePullPolicy { value: String },

    #[error("Backoff limit for {scope} jobs must not be negative, got {value}")]
    NegativeBackoffLimit { scope: &'static str, value: i32 },
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigParseError;
    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        if raw.namespace.trim().is_empty() {
            return Err(ConfigParseError::NamespaceMissing);
        }
        if raw.filer.image.trim().is_empty() {
            return Err(ConfigParseError::FilerImageMissing);
        }

        let image_pull_policy = match raw.filer.image_pull_policy.as_deref() {
            None => ImagePullPolicy::IfNotPresent,
            Some("Always") => ImagePullPolicy::Always,
            Some("IfNotPresent") => ImagePullPolicy::IfNotPresent,
            Some("Never") => ImagePullPolicy::Never,
            Some(other) => {
                return Err(ConfigParseError::UnknownImagePullPolicy {
                    value: other.to_string(),
                });
            }
        };

        for (scope, limit) in [
            ("filer", raw.filer.backoff_limit),
            ("executor", raw.executor_backoff_limit),
        ] {
            if let Some(value) = limit {
                if value < 0 {
                    return Err(ConfigParseError::NegativeBackoffLimit { scope, value });
                }
            }
        }

        Ok(Config {
            namespace: raw.namespace,
            filer: FilerConfig {
                image: raw.filer.image,
                image_pull_policy,
                backoff_limit: raw.filer.backoff_limit,
            },
            storage_class: raw.storage_class,
            polling: raw.polling,
            labels_file: raw
                .labels_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_FILE)),
            executor_backoff_limit: raw.executor_backoff_limit,
        })
    }
}
