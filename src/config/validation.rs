//! Lints over settings and declared stacks
//!
//! Errors stop synthesis. Warnings and hints are printed and synthesis
//! continues; they flag choices that deploy fine but are probably unintended.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::InfraConfig;
use crate::cloud::network::parse_cidr;
use crate::graph::{NodeId, StackGraph};
use crate::k8s::{Manifest, GPU_RESOURCE, SYSTEM_NAMESPACES};
use crate::registry::RepositoryUri;

/// RFC 1123 label: namespaces and services
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"));

/// RFC 1123 subdomain: every other object name
static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
});

static REPOSITORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^(?:[a-z0-9]+(?:[._-][a-z0-9]+)*/)*[a-z0-9]+(?:[._-][a-z0-9]+)*$")
});

static ACCOUNT_ID: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\d{12}$"));

static KUBERNETES_VERSION: LazyLock<Regex> = LazyLock::new(|| pattern(r"^1\.\d{2}$"));

/// Compile a built-in lint pattern
fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|e| panic!("invalid lint pattern {}: {}", source, e))
}

/// Validation result with severity levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ValidationSeverity {
    /// Informational hint
    Info,
    /// Warning - deploys but probably not what was meant
    Warning,
    /// Error - synthesis stops
    Error,
}

/// A single validation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    pub code: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Validation result containing all messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub messages: Vec<ValidationMessage>,
    pub passed: bool,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            passed: true,
        }
    }

    pub fn add(&mut self, msg: ValidationMessage) {
        if msg.severity == ValidationSeverity::Error {
            self.passed = false;
        }
        self.messages.push(msg);
    }

    pub fn info(mut self, code: &str, message: &str) -> Self {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Info,
            code: code.to_string(),
            message: message.to_string(),
            suggestion: None,
        });
        self
    }

    pub fn warning(mut self, code: &str, message: &str, suggestion: Option<&str>) -> Self {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Warning,
            code: code.to_string(),
            message: message.to_string(),
            suggestion: suggestion.map(String::from),
        });
        self
    }

    pub fn error(mut self, code: &str, message: &str, suggestion: Option<&str>) -> Self {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Error,
            code: code.to_string(),
            message: message.to_string(),
            suggestion: suggestion.map(String::from),
        });
        self
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Warning)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.messages.iter().any(|m| m.code == code)
    }
}

// ============================================================================
// SBIO: Pure validation logic (no I/O)
// ============================================================================

/// Lint the settings file
pub fn validate_config(config: &InfraConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !ACCOUNT_ID.is_match(&config.account) {
        result = result.warning(
            "PLACEHOLDER_ACCOUNT",
            &format!("Account '{}' is not a 12-digit account id", config.account),
            Some("Set `account` or pass --account before deploying"),
        );
    }

    if config.region.trim().is_empty() {
        result = result.error("EMPTY_REGION", "No region configured", None);
    }

    if let Err(e) = parse_cidr(&config.network.cidr) {
        result = result.error(
            "INVALID_CIDR",
            &e.to_string(),
            Some("Use an aligned IPv4 block such as 10.0.0.0/16"),
        );
    }

    if !REPOSITORY_NAME.is_match(&config.registry.name) {
        result = result.error(
            "INVALID_REPOSITORY_NAME",
            &format!("'{}' is not a valid registry name", config.registry.name),
            Some("Use lowercase letters, digits and . _ - /"),
        );
    }

    if config.registry.max_image_count == 0 {
        result = result.error(
            "EMPTY_RETENTION",
            "Registry lifecycle rule keeps no images",
            Some("Set registry.max_image_count to at least 1"),
        );
    }

    if !KUBERNETES_VERSION.is_match(&config.cluster.version) {
        result = result.error(
            "INVALID_KUBERNETES_VERSION",
            &format!(
                "Kubernetes version '{}' is not of the form 1.NN",
                config.cluster.version
            ),
            None,
        );
    }

    if config.cluster.admin_user.trim().is_empty() {
        result = result.error("EMPTY_ADMIN_USER", "No cluster admin user configured", None);
    }

    let group = &config.gpu_node_group;
    if !group.ami_type.is_gpu() {
        result = result.warning(
            "GPU_AMI_MISMATCH",
            &format!(
                "Node group '{}' uses {}, which ships no GPU drivers",
                group.name,
                group.ami_type.as_str()
            ),
            Some("Use AL2_x86_64_GPU"),
        );
    }
    if group.instance_types.is_empty() {
        result = result.error(
            "NO_INSTANCE_TYPES",
            &format!("Node group '{}' lists no instance types", group.name),
            None,
        );
    }
    if group.scaling.desired_size() == group.scaling.max_size() {
        result = result.info(
            "NO_SCALE_HEADROOM",
            &format!(
                "Node group '{}' already runs at its maximum size ({})",
                group.name,
                group.scaling.max_size()
            ),
        );
    }

    result
}

fn validate_manifest(
    graph: &StackGraph,
    id: NodeId,
    manifest: &Manifest,
    registry: Option<&RepositoryUri>,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    let name = manifest.name();
    let is_label_kind = matches!(manifest, Manifest::Namespace(_) | Manifest::Service(_));
    let name_ok = if is_label_kind {
        name.len() <= 63 && DNS_LABEL.is_match(name)
    } else {
        name.len() <= 253 && DNS_SUBDOMAIN.is_match(name)
    };
    if !name_ok {
        result = result.error(
            "INVALID_NAME",
            &format!("{} name '{}' is not a valid DNS name", manifest.kind(), name),
            Some("Use lowercase alphanumerics and '-'"),
        );
    }

    let namespace = manifest.namespace().unwrap_or_default();
    let in_system_namespace = SYSTEM_NAMESPACES.contains(&namespace);

    if let Some(selector) = manifest.selector() {
        let dependencies: Vec<_> = graph.node(id).dependencies().collect();
        let anchored_on_workload = dependencies
            .iter()
            .any(|dep| graph.node(*dep).manifest().is_some_and(|m| m.pod_spec().is_some()));
        if !in_system_namespace && !anchored_on_workload {
            result = result.warning(
                "SERVICE_ANCHORED_ON_NAMESPACE",
                &format!(
                    "Service '{}' is ordered after namespace '{}' only and may be applied before its deployment",
                    name, namespace
                ),
                Some("Anchor the service on its deployment"),
            );
        }

        let selects_something = graph.nodes().any(|(_, n)| {
            n.manifest().is_some_and(|m| {
                m.namespace() == manifest.namespace()
                    && m.pod_labels().is_some_and(|labels| {
                        selector.iter().all(|(k, v)| labels.get(k) == Some(v))
                    })
            })
        });
        if !selects_something {
            result = result.warning(
                "SERVICE_SELECTS_NOTHING",
                &format!("Service '{}' selects no declared workload", name),
                None,
            );
        }
    }

    if let Some(spec) = manifest.pod_spec() {
        let uses_gpu = spec.containers.iter().any(|c| c.uses_gpu());
        if uses_gpu && !spec.tolerates(GPU_RESOURCE) {
            result = result.warning(
                "GPU_WITHOUT_TOLERATION",
                &format!(
                    "{} '{}' requests {} but does not tolerate the GPU node taint",
                    manifest.kind(),
                    name,
                    GPU_RESOURCE
                ),
                Some("Add an Exists/NoSchedule toleration for nvidia.com/gpu"),
            );
        }

        if let Some(registry) = registry {
            if !in_system_namespace {
                for container in &spec.containers {
                    if !registry.contains_image(&container.image) {
                        result = result.info(
                            "IMAGE_OUTSIDE_REGISTRY",
                            &format!(
                                "Container '{}' pulls '{}' from outside {}",
                                container.name, container.image, registry
                            ),
                        );
                    }
                }
            }
        }
    }

    result
}

/// Lint every manifest of a stack; results are keyed by logical id and
/// only nodes with findings appear
pub fn validate_graph(
    graph: &StackGraph,
    registry: Option<&RepositoryUri>,
) -> BTreeMap<String, ValidationResult> {
    graph
        .nodes()
        .filter_map(|(id, node)| {
            let manifest = node.manifest()?;
            let result = validate_manifest(graph, id, manifest, registry);
            (!result.messages.is_empty()).then(|| (node.logical_id.clone(), result))
        })
        .collect()
}

/// Whether any result in a report is an error
pub fn report_has_errors<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> bool {
    results.into_iter().any(|r| r.has_errors())
}

/// Format validation results for display
pub fn format_validation_results(results: &BTreeMap<String, ValidationResult>) -> String {
    let mut output = String::new();

    for (subject, result) in results {
        if result.messages.is_empty() {
            continue;
        }

        output.push_str(&format!("\n[{}]\n", subject));

        for msg in &result.messages {
            let prefix = match msg.severity {
                ValidationSeverity::Info => "INFO",
                ValidationSeverity::Warning => "WARN",
                ValidationSeverity::Error => "ERROR",
            };

            output.push_str(&format!("  {} [{}]: {}\n", prefix, msg.code, msg.message));

            if let Some(suggestion) = &msg.suggestion {
                output.push_str(&format!("    -> {}\n", suggestion));
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{AmiType, ScalingConfig};
    use crate::graph::ServiceAnchor;
    use crate::k8s::{
        Container, Deployment, Namespace, ObjectMeta, PodSpec, PodTemplateSpec,
        ResourceRequirements, Service, ServicePort, Toleration,
    };
    use crate::template::CfnResource;

    fn gpu_deployment(namespace: &str, tolerate: bool) -> Deployment {
        let container = Container::new("ai", "123.dkr.ecr.eu-north-1.amazonaws.com/repo:ai")
            .with_resources(
                ResourceRequirements::default()
                    .request(GPU_RESOURCE, 1u32)
                    .limit(GPU_RESOURCE, 1u32),
            );
        let tolerations = if tolerate { vec![Toleration::gpu()] } else { vec![] };
        Deployment::new(
            ObjectMeta::namespaced("ai", namespace),
            PodTemplateSpec::labelled(
                "app",
                "ai",
                PodSpec {
                    tolerations,
                    containers: vec![container],
                    ..Default::default()
                },
            ),
        )
    }

    fn service(name: &str, namespace: &str, app: &str) -> Service {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), app.to_string());
        Service::new(
            ObjectMeta::namespaced(name, namespace),
            selector,
            vec![ServicePort::new(80, 80)],
        )
    }

    fn graph_with(tolerate: bool, anchor_on_deployment: bool) -> StackGraph {
        let mut graph = StackGraph::new();
        graph
            .add_cluster("Cluster", CfnResource::bare("AWS::EKS::Cluster"))
            .unwrap();
        let ns = graph.add_namespace("Ns", Namespace::new("ai")).unwrap();
        let dep = graph
            .add_workload("Dep", &ns, gpu_deployment("ai", tolerate))
            .unwrap();
        let anchor = if anchor_on_deployment {
            ServiceAnchor::Deployment(&dep)
        } else {
            ServiceAnchor::Namespace(&ns)
        };
        graph
            .add_service("Svc", anchor, service("ai", "ai", "ai"))
            .unwrap();
        graph
    }

    #[test]
    fn test_validation_result_builder() {
        let result = ValidationResult::new()
            .info("TEST_INFO", "Info message")
            .warning("TEST_WARN", "Warning message", Some("Do this"))
            .error("TEST_ERR", "Error message", None);

        assert_eq!(result.messages.len(), 3);
        assert!(result.has_errors());
        assert!(result.has_warnings());
        assert!(!result.passed);
    }

    #[test]
    fn test_default_config_only_flags_placeholder_account() {
        let result = validate_config(&InfraConfig::default());
        assert!(!result.has_errors());
        assert!(result.has_code("PLACEHOLDER_ACCOUNT"));
        assert!(!result.has_code("GPU_AMI_MISMATCH"));
    }

    #[test]
    fn test_real_account_passes() {
        let mut config = InfraConfig::default();
        config.account = "123456789012".to_string();
        assert!(!validate_config(&config).has_warnings());
    }

    #[test]
    fn test_unaligned_cidr_is_an_error() {
        for cidr in ["10.0.0.1/16", "255.255.255.255/24", "10.0.0.0"] {
            let mut config = InfraConfig::default();
            config.network.cidr = cidr.to_string();
            let result = validate_config(&config);
            assert!(result.has_errors(), "{} accepted", cidr);
            assert!(result.has_code("INVALID_CIDR"));
        }
    }

    #[test]
    fn test_lint_patterns_compile() {
        assert!(DNS_LABEL.is_match("portal"));
        assert!(DNS_SUBDOMAIN.is_match("metrics-server.v1"));
        assert!(REPOSITORY_NAME.is_match("team/infrastructure-ecr"));
        assert!(ACCOUNT_ID.is_match("123456789012"));
        assert!(KUBERNETES_VERSION.is_match("1.31"));
    }

    #[test]
    fn test_config_errors() {
        let mut config = InfraConfig::default();
        config.cluster.version = "latest".to_string();
        config.registry.max_image_count = 0;
        config.registry.name = "Infrastructure_ECR".to_string();

        let result = validate_config(&config);
        assert!(result.has_code("INVALID_KUBERNETES_VERSION"));
        assert!(result.has_code("EMPTY_RETENTION"));
        assert!(result.has_code("INVALID_REPOSITORY_NAME"));
        assert!(!result.passed);
    }

    #[test]
    fn test_non_gpu_ami_warns() {
        let mut config = InfraConfig::default();
        config.gpu_node_group.ami_type = AmiType::Al2X86_64;
        config.gpu_node_group.scaling = ScalingConfig::new(1, 1, 3).unwrap();

        let result = validate_config(&config);
        assert!(result.has_code("GPU_AMI_MISMATCH"));
        assert!(!result.has_code("NO_SCALE_HEADROOM"));
    }

    #[test]
    fn test_service_anchored_on_namespace_warns() {
        let report = validate_graph(&graph_with(true, false), None);
        assert!(report["Svc"].has_code("SERVICE_ANCHORED_ON_NAMESPACE"));
        assert!(!report_has_errors(report.values()));

        let report = validate_graph(&graph_with(true, true), None);
        assert!(!report.contains_key("Svc"));
    }

    #[test]
    fn test_gpu_without_toleration_warns() {
        let report = validate_graph(&graph_with(false, true), None);
        assert!(report["Dep"].has_code("GPU_WITHOUT_TOLERATION"));

        let report = validate_graph(&graph_with(true, true), None);
        assert!(!report.contains_key("Dep"));
    }

    #[test]
    fn test_image_outside_registry() {
        let graph = graph_with(true, true);
        let own = RepositoryUri::new("123.dkr.ecr.eu-north-1.amazonaws.com/repo");
        assert!(validate_graph(&graph, Some(&own)).is_empty());

        let other = RepositoryUri::new("999.dkr.ecr.eu-north-1.amazonaws.com/other");
        let report = validate_graph(&graph, Some(&other));
        assert!(report["Dep"].has_code("IMAGE_OUTSIDE_REGISTRY"));
    }

    #[test]
    fn test_service_selecting_nothing() {
        let mut graph = graph_with(true, true);
        let ns = graph.add_namespace("Ns2", Namespace::new("empty")).unwrap();
        graph
            .add_service(
                "Lonely",
                ServiceAnchor::Namespace(&ns),
                service("lonely", "empty", "nobody"),
            )
            .unwrap();

        let report = validate_graph(&graph, None);
        assert!(report["Lonely"].has_code("SERVICE_SELECTS_NOTHING"));
    }

    #[test]
    fn test_invalid_names() {
        let mut graph = StackGraph::new();
        graph
            .add_cluster("Cluster", CfnResource::bare("AWS::EKS::Cluster"))
            .unwrap();
        graph
            .add_namespace("Bad", Namespace::new("Not_Valid"))
            .unwrap();

        let report = validate_graph(&graph, None);
        assert!(report["Bad"].has_code("INVALID_NAME"));
        assert!(report_has_errors(report.values()));
    }

    #[test]
    fn test_format_validation_results() {
        let mut results = BTreeMap::new();
        results.insert(
            "DataplatformService".to_string(),
            ValidationResult::new().warning(
                "SERVICE_ANCHORED_ON_NAMESPACE",
                "This is a warning",
                Some("Fix it this way"),
            ),
        );

        let output = format_validation_results(&results);
        assert!(output.contains("[DataplatformService]"));
        assert!(output.contains("WARN"));
        assert!(output.contains("Fix it this way"));
    }
}
