//! Cluster-level object types: namespaces, services and config maps

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Object metadata shared by every manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name
    pub name: String,

    /// Namespace (absent for cluster-scoped objects)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Labels for organization and selection
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Metadata for an object living in `namespace`
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind is always "Namespace"
    pub kind: String,

    pub metadata: ObjectMeta,
}

impl Namespace {
    /// Create a new namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
            metadata: ObjectMeta::cluster_scoped(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Label selector used by workloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Match exact labels
    #[serde(rename = "matchLabels")]
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(key.into(), value.into());
        Self {
            match_labels: labels,
        }
    }

    /// Check if labels match this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// A service exposing pods selected by label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind is always "Service"
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// ClusterIP when absent
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,

    pub ports: Vec<ServicePort>,

    /// Pod labels this service routes to
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    pub port: u16,

    #[serde(rename = "targetPort")]
    pub target_port: u16,
}

impl ServicePort {
    pub fn new(port: u16, target_port: u16) -> Self {
        Self {
            protocol: None,
            port,
            target_port,
        }
    }

    pub fn tcp(port: u16, target_port: u16) -> Self {
        Self {
            protocol: Some("TCP".to_string()),
            port,
            target_port,
        }
    }
}

impl Service {
    /// Create a ClusterIP service in `namespace` selecting pods by `selector`
    pub fn new(
        metadata: ObjectMeta,
        selector: BTreeMap<String, String>,
        ports: Vec<ServicePort>,
    ) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata,
            spec: ServiceSpec {
                service_type: None,
                ports,
                selector,
            },
        }
    }

    /// Expose through a cloud load balancer
    pub fn load_balancer(mut self) -> Self {
        self.spec.service_type = Some(ServiceType::LoadBalancer);
        self
    }
}

/// A config map holding string data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind is always "ConfigMap"
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata,
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace() {
        let ns = Namespace::new("portal");
        assert_eq!(ns.name(), "portal");
        assert_eq!(ns.kind, "Namespace");
        assert!(ns.metadata.namespace.is_none());
    }

    #[test]
    fn test_namespace_serializes_without_empty_fields() {
        let json = serde_json::to_value(Namespace::new("sre")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "sre"}
            })
        );
    }

    #[test]
    fn test_label_selector_matches() {
        let selector = LabelSelector::matching("app", "portal");

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "portal".to_string());
        labels.insert("tier".to_string(), "web".to_string());

        assert!(selector.matches(&labels));
    }

    #[test]
    fn test_label_selector_no_match() {
        let selector = LabelSelector::matching("app", "portal");

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "dataplatform".to_string());

        assert!(!selector.matches(&labels));
    }

    #[test]
    fn test_load_balancer_service() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "portal".to_string());
        let svc = Service::new(
            ObjectMeta::namespaced("portal", "portal"),
            selector,
            vec![ServicePort::new(8000, 8000)],
        )
        .load_balancer();

        let json = serde_json::to_value(&svc).unwrap();
        assert_eq!(json["spec"]["type"], "LoadBalancer");
        assert_eq!(json["spec"]["ports"][0]["targetPort"], 8000);
        assert!(json["spec"]["ports"][0].get("protocol").is_none());
    }
}
