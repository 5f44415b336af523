use crate::Pod;

/// Returns true if the pod's `Ready` condition is true.
pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// Returns true if the pod is in the `Running` phase.
pub fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Returns true if the pod has been marked for deletion.
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObjectMeta, PodStatus, Time};
    use k8s_openapi::api::core::v1::PodCondition;

    fn pod(phase: &str, ready: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("pod-0".to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: Some("10.0.0.5".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn predicates() {
        let p = pod("Running", "True");
        assert!(is_ready(&p));
        assert!(is_running(&p));
        assert!(!is_terminating(&p));
        assert_eq!(pod_ip(&p), Some("10.0.0.5"));

        let p = pod("Pending", "False");
        assert!(!is_ready(&p));
        assert!(!is_running(&p));

        let mut p = pod("Running", "True");
        let deleted: Time = serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap();
        p.metadata.deletion_timestamp = Some(deleted);
        assert!(is_terminating(&p));

        p.status = None;
        assert!(!is_ready(&p));
        assert_eq!(pod_ip(&p), None);
    }
}
