//! Kubernetes object manifests applied to the cluster
//!
//! Every document follows the orchestrator's `apiVersion/kind/metadata/spec`
//! wire shape. The types here cover only the fields this repository emits.

pub mod resources;
pub mod workload;

pub use resources::{
    ConfigMap, LabelSelector, Namespace, ObjectMeta, Service, ServicePort, ServiceSpec,
    ServiceType,
};
pub use workload::{
    Capabilities, Container, ContainerPort, DaemonSet, Deployment, DeploymentStrategy,
    PodSpec, PodTemplateSpec, Quantity, ResourceRequirements, SecurityContext, Toleration,
    Volume, GPU_RESOURCE,
};

use std::collections::BTreeMap;

use serde::Serialize;

/// Namespaces that exist on every cluster and are never declared here
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "default"];

/// Any manifest this repository can apply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Manifest {
    Namespace(Namespace),
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    Service(Service),
    ConfigMap(ConfigMap),
}

impl Manifest {
    pub fn kind(&self) -> &str {
        match self {
            Manifest::Namespace(m) => &m.kind,
            Manifest::Deployment(m) => &m.kind,
            Manifest::DaemonSet(m) => &m.kind,
            Manifest::Service(m) => &m.kind,
            Manifest::ConfigMap(m) => &m.kind,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Manifest::Namespace(m) => &m.metadata,
            Manifest::Deployment(m) => &m.metadata,
            Manifest::DaemonSet(m) => &m.metadata,
            Manifest::Service(m) => &m.metadata,
            Manifest::ConfigMap(m) => &m.metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Namespace the object lives in, `None` for cluster-scoped objects
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Pod template of workload kinds
    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Manifest::Deployment(d) => Some(&d.spec.template.spec),
            Manifest::DaemonSet(d) => Some(&d.spec.template.spec),
            _ => None,
        }
    }

    /// Labels stamped on the pods of workload kinds
    pub fn pod_labels(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Manifest::Deployment(d) => Some(&d.spec.template.metadata.labels),
            Manifest::DaemonSet(d) => Some(&d.spec.template.metadata.labels),
            _ => None,
        }
    }

    /// Service selector, for services
    pub fn selector(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Manifest::Service(s) => Some(&s.spec.selector),
            _ => None,
        }
    }
}

impl From<Namespace> for Manifest {
    fn from(m: Namespace) -> Self {
        Manifest::Namespace(m)
    }
}

impl From<Deployment> for Manifest {
    fn from(m: Deployment) -> Self {
        Manifest::Deployment(m)
    }
}

impl From<DaemonSet> for Manifest {
    fn from(m: DaemonSet) -> Self {
        Manifest::DaemonSet(m)
    }
}

impl From<Service> for Manifest {
    fn from(m: Service) -> Self {
        Manifest::Service(m)
    }
}

impl From<ConfigMap> for Manifest {
    fn from(m: ConfigMap) -> Self {
        Manifest::ConfigMap(m)
    }
}

/// Render manifests as one multi-document YAML stream
pub fn to_yaml_stream(manifests: &[&Manifest]) -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for manifest in manifests {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(manifest)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_accessors() {
        let ns: Manifest = Namespace::new("portal").into();
        assert_eq!(ns.kind(), "Namespace");
        assert_eq!(ns.name(), "portal");
        assert_eq!(ns.namespace(), None);
        assert!(ns.pod_spec().is_none());

        let cm: Manifest = ConfigMap::new(ObjectMeta::namespaced("aws-auth", "kube-system")).into();
        assert_eq!(cm.namespace(), Some("kube-system"));
    }

    #[test]
    fn test_manifest_serializes_as_plain_document() {
        let ns: Manifest = Namespace::new("sre").into();
        let json = serde_json::to_value(&ns).unwrap();
        assert_eq!(json["kind"], "Namespace");
        assert!(json.get("Namespace").is_none());
    }

    #[test]
    fn test_yaml_stream() {
        let a: Manifest = Namespace::new("a").into();
        let b: Manifest = Namespace::new("b").into();
        let yaml = to_yaml_stream(&[&a, &b]).unwrap();
        assert_eq!(yaml.matches("---\n").count(), 2);
        assert!(yaml.find("name: a").unwrap() < yaml.find("name: b").unwrap());
    }
}
