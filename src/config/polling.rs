use duration_str::deserialize_duration;
use std::time::Duration;

use serde::Deserialize;

/// Cadence of the job status polling loop.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) struct PollingConfig {
    /// Time between consecutive status reads of a running job.
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_poll_interval"
    )]
    pub(crate) poll_interval: Duration,

    /// How long a job's pod may stay `Pending` before an `ImagePullBackOff`
    /// is treated as fatal.
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_pod_timeout"
    )]
    pub(crate) pod_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            pod_timeout: Duration::from_secs(120),
        }
    }
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}
const fn default_pod_timeout() -> Duration {
    Duration::from_secs(120)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, Debug, PartialEq)]
    struct A {
        #[serde(default)]
        config: PollingConfig,
    }

    #[test]
    fn test_polling_config_deserialize_defaults() {
        let yaml_data = r#"
          config:
            poll_interval: 15s
        "#;

        let a: A = serde_yaml::from_str(yaml_data).unwrap();

        assert_eq!(
            a.config,
            PollingConfig {
                poll_interval: Duration::from_secs(15),
                pod_timeout: Duration::from_secs(120),
            }
        );
    }

    #[test]
    fn test_polling_config_deserialize_omitted() {
        let yaml_data = r#"{}"#;

        let a: A = serde_yaml::from_str(yaml_data).unwrap();

        assert_eq!(
            a.config,
            PollingConfig {
                poll_interval: Duration::from_secs(5),
                pod_timeout: Duration::from_secs(120),
            }
        );
    }
}
