//! Namespace memory floor derived from LimitRanges.
//!
//! Executor manifests arrive with whatever memory request the task asked
//! for. A namespace LimitRange rejects pods below its Container minimum,
//! so the smallest such minimum is applied as a floor before submission.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::LimitRange;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ListParams;
use kube::{Api, Client};

/// Smallest Container-type memory minimum across the namespace's
/// LimitRanges, or None when nothing constrains memory.
pub(crate) async fn minimum_ram_floor(
    client: Client,
    namespace: &str,
) -> Result<Option<Quantity>, kube::Error> {
    let ranges: Api<LimitRange> = Api::namespaced(client, namespace);
    let list = ranges.list(&ListParams::default()).await?;
    Ok(smallest_container_minimum(&list.items))
}

fn smallest_container_minimum(ranges: &[LimitRange]) -> Option<Quantity> {
    let mut smallest: Option<(u64, Quantity)> = None;
    for range in ranges {
        let Some(spec) = &range.spec else { continue };
        for limit in &spec.limits {
            if limit.type_ != "Container" {
                continue;
            }
            let Some(memory) = limit.min.as_ref().and_then(|min| min.get("memory")) else {
                continue;
            };
            let Some(bytes) = parse_quantity_bytes(memory) else {
                continue;
            };
            if smallest.as_ref().is_none_or(|(best, _)| bytes < *best) {
                smallest = Some((bytes, memory.clone()));
            }
        }
    }
    smallest.map(|(_, quantity)| quantity)
}

/// Raises the first container's memory request to `floor` when it asks for
/// less. Requests left unset stay unset so namespace defaults apply.
pub(crate) fn apply_ram_floor(job: &mut Job, floor: &Quantity) {
    let Some(floor_bytes) = parse_quantity_bytes(floor) else {
        return;
    };
    let Some(requests) = job
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.first_mut())
        .and_then(|container| container.resources.as_mut())
        .and_then(|resources| resources.requests.as_mut())
    else {
        return;
    };
    if let Some(bytes) = requests.get("memory").and_then(parse_quantity_bytes) {
        if bytes < floor_bytes {
            requests.insert("memory".to_string(), floor.clone());
        }
    }
}

/// Byte count of a Kubernetes quantity. Handles the binary and decimal
/// suffixes that appear in LimitRanges; anything else reads as None.
fn parse_quantity_bytes(quantity: &Quantity) -> Option<u64> {
    let text = quantity.0.trim();
    let boundary = text
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(boundary);
    let value: f64 = number.parse().ok()?;
    let factor: f64 = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => return None,
    };
    Some((value * factor).round() as u64)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::{
        Container, LimitRangeItem, LimitRangeSpec, PodSpec, PodTemplateSpec, ResourceRequirements,
    };

    use super::*;

    fn bytes_of(text: &str) -> Option<u64> {
        parse_quantity_bytes(&Quantity(text.to_string()))
    }

    #[test]
    fn test_quantity_suffixes() {
        assert_eq!(bytes_of("128974848"), Some(128974848));
        assert_eq!(bytes_of("128Mi"), Some(134217728));
        assert_eq!(bytes_of("1.5Gi"), Some(1610612736));
        assert_eq!(bytes_of("100k"), Some(100000));
        assert_eq!(bytes_of("2G"), Some(2000000000));
        assert_eq!(bytes_of("12Qi"), None);
        assert_eq!(bytes_of("plenty"), None);
    }

    fn range_with(limits: Vec<LimitRangeItem>) -> LimitRange {
        LimitRange {
            spec: Some(LimitRangeSpec { limits }),
            ..Default::default()
        }
    }

    fn container_minimum(memory: &str) -> LimitRangeItem {
        LimitRangeItem {
            type_: "Container".to_string(),
            min: Some(BTreeMap::from([(
                "memory".to_string(),
                Quantity(memory.to_string()),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_smallest_minimum_spans_all_ranges() {
        let ranges = vec![
            range_with(vec![container_minimum("256Mi")]),
            range_with(vec![
                LimitRangeItem {
                    type_: "Pod".to_string(),
                    min: Some(BTreeMap::from([(
                        "memory".to_string(),
                        Quantity("1Mi".to_string()),
                    )])),
                    ..Default::default()
                },
                container_minimum("64Mi"),
            ]),
        ];
        let floor = smallest_container_minimum(&ranges).unwrap();
        assert_eq!(floor.0, "64Mi");
    }

    #[test]
    fn test_no_ranges_means_no_floor() {
        assert_eq!(smallest_container_minimum(&[]), None);
        let cpu_only = range_with(vec![LimitRangeItem {
            type_: "Container".to_string(),
            min: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity("100m".to_string()),
            )])),
            ..Default::default()
        }]);
        assert_eq!(smallest_container_minimum(&[cpu_only]), None);
    }

    fn job_requesting(memory: Option<&str>) -> Job {
        let requests = memory.map(|m| {
            BTreeMap::from([("memory".to_string(), Quantity(m.to_string()))])
        });
        Job {
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "executor".to_string(),
                            resources: requests.map(|requests| ResourceRequirements {
                                requests: Some(requests),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn requested_memory(job: &Job) -> Option<String> {
        job.spec
            .as_ref()?
            .template
            .spec
            .as_ref()?
            .containers
            .first()?
            .resources
            .as_ref()?
            .requests
            .as_ref()?
            .get("memory")
            .map(|q| q.0.clone())
    }

    #[test]
    fn test_floor_raises_undersized_requests() {
        let floor = Quantity("64Mi".to_string());

        let mut undersized = job_requesting(Some("32Mi"));
        apply_ram_floor(&mut undersized, &floor);
        assert_eq!(requested_memory(&undersized).as_deref(), Some("64Mi"));

        let mut roomy = job_requesting(Some("128Mi"));
        apply_ram_floor(&mut roomy, &floor);
        assert_eq!(requested_memory(&roomy).as_deref(), Some("128Mi"));

        let mut unset = job_requesting(None);
        apply_ram_floor(&mut unset, &floor);
        assert_eq!(requested_memory(&unset), None);
    }
}
