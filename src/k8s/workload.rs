//! Workload objects: deployments, daemon sets and their pod templates

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::resources::{LabelSelector, ObjectMeta};

/// Extended resource name for NVIDIA GPUs
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// A resource quantity: either a plain count or a suffixed string ("500m", "8Gi")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Count(u32),
    Amount(String),
}

impl From<&str> for Quantity {
    fn from(s: &str) -> Self {
        Quantity::Amount(s.to_string())
    }
}

impl From<u32> for Quantity {
    fn from(n: u32) -> Self {
        Quantity::Count(n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
}

impl ResourceRequirements {
    pub fn request(mut self, name: &str, quantity: impl Into<Quantity>) -> Self {
        self.requests.insert(name.to_string(), quantity.into());
        self
    }

    pub fn limit(mut self, name: &str, quantity: impl Into<Quantity>) -> Self {
        self.limits.insert(name.to_string(), quantity.into());
        self
    }

    /// Whether any request or limit names the GPU resource
    pub fn uses_gpu(&self) -> bool {
        self.requests.contains_key(GPU_RESOURCE) || self.limits.contains_key(GPU_RESOURCE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ContainerPort {
    pub fn new(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: None,
        }
    }

    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Some("TCP".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_root_filesystem: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostPathSource {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathSource>,
}

impl Volume {
    pub fn host_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_path: Some(HostPathSource { path: path.into() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,

    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            args: Vec::new(),
            ports: Vec::new(),
            resources: None,
            security_context: None,
            volume_mounts: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: ContainerPort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_security_context(mut self, ctx: SecurityContext) -> Self {
        self.security_context = Some(ctx);
        self
    }

    pub fn with_volume_mount(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.volume_mounts.push(VolumeMount {
            name: name.into(),
            mount_path: path.into(),
        });
        self
    }

    pub fn uses_gpu(&self) -> bool {
        self.resources.as_ref().is_some_and(|r| r.uses_gpu())
    }
}

/// Taint toleration on a pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    pub operator: String,
    pub effect: String,
}

impl Toleration {
    /// Tolerate the `nvidia.com/gpu` NoSchedule taint placed on GPU nodes
    pub fn gpu() -> Self {
        Self {
            key: GPU_RESOURCE.to_string(),
            operator: "Exists".to_string(),
            effect: "NoSchedule".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

impl PodSpec {
    pub fn tolerates(&self, key: &str) -> bool {
        self.tolerations.iter().any(|t| t.key == key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplateMeta {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    pub metadata: PodTemplateMeta,
    pub spec: PodSpec,
}

impl PodTemplateSpec {
    /// Pod template labelled `key=value`
    pub fn labelled(key: &str, value: &str, spec: PodSpec) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(key.to_string(), value.to_string());
        Self {
            metadata: PodTemplateMeta { labels },
            spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    pub max_unavailable: u32,
    pub max_surge: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    #[serde(rename = "type")]
    pub strategy_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdate>,
}

impl DeploymentStrategy {
    pub fn rolling(max_unavailable: u32, max_surge: u32) -> Self {
        Self {
            strategy_type: "RollingUpdate".to_string(),
            rolling_update: Some(RollingUpdate {
                max_unavailable,
                max_surge,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,

    pub selector: LabelSelector,

    pub template: PodTemplateSpec,
}

/// A deployment of replicated pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind is always "Deployment"
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: DeploymentSpec,
}

impl Deployment {
    /// Create a deployment whose selector matches the template's labels
    pub fn new(metadata: ObjectMeta, template: PodTemplateSpec) -> Self {
        let selector = LabelSelector {
            match_labels: template.metadata.labels.clone(),
        };
        Self {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata,
            spec: DeploymentSpec {
                replicas: None,
                strategy: None,
                selector,
                template,
            },
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.spec.replicas = Some(replicas);
        self
    }

    pub fn with_strategy(mut self, strategy: DeploymentStrategy) -> Self {
        self.spec.strategy = Some(strategy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSetSpec {
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
}

/// One pod per node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSet {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind is always "DaemonSet"
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: DaemonSetSpec,
}

impl DaemonSet {
    pub fn new(metadata: ObjectMeta, template: PodTemplateSpec) -> Self {
        let selector = LabelSelector {
            match_labels: template.metadata.labels.clone(),
        };
        Self {
            api_version: "apps/v1".to_string(),
            kind: "DaemonSet".to_string(),
            metadata,
            spec: DaemonSetSpec { selector, template },
        }
    }
}
