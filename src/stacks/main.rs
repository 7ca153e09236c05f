//! GPU cluster stack: network, roles, cluster, node group and workloads

use std::collections::BTreeMap;

use tracing::info;

use super::{StackError, SynthesizedStack, MAIN_STACK};
use crate::cloud::{AwsAuth, Cluster, Role, Vpc};
use crate::config::InfraConfig;
use crate::graph::{render_template, RenderOptions, ServiceAnchor, StackGraph};
use crate::k8s::{
    Capabilities, Container, ContainerPort, DaemonSet, Deployment, DeploymentStrategy, Namespace,
    ObjectMeta, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Service,
    ServicePort, Toleration, Volume, GPU_RESOURCE,
};
use crate::registry::RepositoryUri;
use crate::template::{intrinsic, Output};

pub const VPC_ID: &str = "EksGpuVpc";
pub const NODE_ROLE_ID: &str = "GpuNodeRole";
pub const CLUSTER_ROLE_ID: &str = "InfrastructureEksClusterRole";
pub const CLUSTER_ID: &str = "Infrastructure";
pub const NODE_GROUP_ID: &str = "GpuNodeGroup";
pub const CLUSTER_NAME_OUTPUT: &str = "ClusterName";

/// Policies every node needs to join the cluster and pull images
const NODE_POLICIES: [&str; 4] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonSSMManagedInstanceCore",
];

const METRICS_SERVER_IMAGE: &str = "k8s.gcr.io/metrics-server/metrics-server:v0.6.3";
const DEVICE_PLUGIN_IMAGE: &str = "nvcr.io/nvidia/k8s-device-plugin:v0.13.0";
const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins";

fn gpu_node_role() -> Role {
    Role::assumed_by("ec2.amazonaws.com").with_managed_policies(NODE_POLICIES)
}

fn eks_cluster_role() -> Role {
    Role::assumed_by_all(["eks.amazonaws.com", "ec2.amazonaws.com"])
        .named(CLUSTER_ROLE_ID)
        .with_managed_policies(["AmazonEKSClusterPolicy"])
        .with_managed_policies(NODE_POLICIES)
}

fn metrics_server() -> Deployment {
    let container = Container::new("metrics-server", METRICS_SERVER_IMAGE)
        .with_args([
            "--cert-dir=/tmp",
            "--secure-port=4443",
            "--kubelet-insecure-tls",
            "--kubelet-preferred-address-types=InternalIP",
        ])
        .with_port(ContainerPort::tcp(4443))
        .with_security_context(SecurityContext {
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            ..Default::default()
        });

    Deployment::new(
        ObjectMeta::namespaced("metrics-server", "kube-system")
            .with_label("k8s-app", "metrics-server"),
        PodTemplateSpec::labelled(
            "k8s-app",
            "metrics-server",
            PodSpec {
                host_network: Some(true),
                containers: vec![container],
                ..Default::default()
            },
        ),
    )
}

fn metrics_service() -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("k8s-app".to_string(), "metrics-server".to_string());
    Service::new(
        ObjectMeta::namespaced("metrics-server", "kube-system")
            .with_label("k8s-app", "metrics-server"),
        selector,
        vec![ServicePort::tcp(443, 4443)],
    )
}

fn nvidia_device_plugin() -> DaemonSet {
    let container = Container::new("nvidia-device-plugin-ctr", DEVICE_PLUGIN_IMAGE)
        .with_security_context(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: vec!["ALL".to_string()],
            }),
            ..Default::default()
        })
        .with_volume_mount("device-plugin", DEVICE_PLUGIN_PATH);

    DaemonSet::new(
        ObjectMeta::namespaced("nvidia-device-plugin-daemonset", "kube-system"),
        PodTemplateSpec::labelled(
            "name",
            "nvidia-device-plugin",
            PodSpec {
                containers: vec![container],
                volumes: vec![Volume::host_path("device-plugin", DEVICE_PLUGIN_PATH)],
                ..Default::default()
            },
        ),
    )
}

/// Single-replica deployment replaced in place: one pod down, none extra
fn app_deployment(name: &str, container: Container, tolerations: Vec<Toleration>) -> Deployment {
    Deployment::new(
        ObjectMeta::namespaced(name, name),
        PodTemplateSpec::labelled(
            "app",
            name,
            PodSpec {
                tolerations,
                containers: vec![container],
                ..Default::default()
            },
        ),
    )
    .with_replicas(1)
    .with_strategy(DeploymentStrategy::rolling(1, 0))
}

fn portal_deployment(registry: &RepositoryUri, tag: &str) -> Deployment {
    let container = Container::new("portal", registry.image(tag))
        .with_port(ContainerPort::new(8000))
        .with_resources(
            ResourceRequirements::default()
                .request("cpu", "500m")
                .request("memory", "512Mi")
                .limit("cpu", "1000m")
                .limit("memory", "1Gi"),
        );
    app_deployment("portal", container, Vec::new())
}

fn dataplatform_deployment(registry: &RepositoryUri, tag: &str) -> Deployment {
    let container = Container::new("dataplatform-ai", registry.image(tag))
        .with_port(ContainerPort::new(8010))
        .with_resources(
            ResourceRequirements::default()
                .request("cpu", "3000m")
                .request("memory", "8Gi")
                .request(GPU_RESOURCE, 1u32)
                .limit("cpu", "4000m")
                .limit("memory", "15Gi")
                .limit(GPU_RESOURCE, 1u32),
        );
    app_deployment("dataplatform", container, vec![Toleration::gpu()])
}

fn load_balancer(name: &str, port: u16) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), name.to_string());
    Service::new(
        ObjectMeta::namespaced(name, name),
        selector,
        vec![ServicePort::new(port, port)],
    )
    .load_balancer()
}

pub fn synthesize(
    config: &InfraConfig,
    registry: &RepositoryUri,
) -> Result<SynthesizedStack, StackError> {
    let mut graph = StackGraph::new();

    let vpc = Vpc {
        cidr: config.network.cidr.clone(),
        max_azs: config.network.max_azs,
    }
    .declare(&mut graph, MAIN_STACK, VPC_ID)?;

    let node_role = graph.add_resource(NODE_ROLE_ID, gpu_node_role().to_resource())?;
    let cluster_role = graph.add_resource(CLUSTER_ROLE_ID, eks_cluster_role().to_resource())?;

    let declared = Cluster {
        name: config.cluster.name.clone(),
        version: config.cluster.version.clone(),
        default_capacity: config.cluster.default_capacity,
    }
    .declare(&mut graph, CLUSTER_ID, cluster_role, &vpc)?;
    let cluster = declared.cluster;

    config
        .gpu_node_group
        .declare(&mut graph, NODE_GROUP_ID, cluster, node_role, &vpc)?;

    graph.add_system_manifest("MetricsServer", metrics_server())?;
    graph.add_system_manifest("MetricsService", metrics_service())?;
    graph.add_system_manifest("NvidiaDevicePluginManifest", nvidia_device_plugin())?;

    let mut auth = AwsAuth::new();
    auth.add_node_role(NODE_ROLE_ID);
    if let Some(role) = declared.default_capacity_role {
        auth.add_node_role(graph.logical_id(role));
    }
    auth.add_user_mapping(&config.admin_user_arn(), ["system:masters"]);
    graph.add_system_manifest("AwsAuth", auth.to_config_map()?)?;

    graph.add_namespace("SreNamespace", Namespace::new("sre"))?;

    let portal_ns = graph.add_namespace("PortalNamespace", Namespace::new("portal"))?;
    let portal = graph.add_workload(
        "PortalDeployment",
        &portal_ns,
        portal_deployment(registry, &config.images.portal),
    )?;
    graph.add_service(
        "PortalService",
        ServiceAnchor::Deployment(&portal),
        load_balancer("portal", 8000),
    )?;

    let dataplatform_ns =
        graph.add_namespace("DataplatformNamespace", Namespace::new("dataplatform"))?;
    graph.add_workload(
        "DataplatformDeployment",
        &dataplatform_ns,
        dataplatform_deployment(registry, &config.images.dataplatform),
    )?;
    // Ordered after the namespace only, as deployed today
    graph.add_service(
        "DataplatformService",
        ServiceAnchor::Namespace(&dataplatform_ns),
        load_balancer("dataplatform", 8010),
    )?;

    let options = RenderOptions {
        description: Some("EKS cluster with a GPU node group and its workloads".to_string()),
        ..Default::default()
    };
    let mut template = render_template(&graph, &options)?;
    template.outputs.insert(
        CLUSTER_NAME_OUTPUT.to_string(),
        Output::new(intrinsic::reference(CLUSTER_ID)),
    );

    info!(
        "Synthesized {} ({} resources, {} manifests)",
        MAIN_STACK,
        template.resources.len(),
        graph.manifests_in_order().len()
    );

    Ok(SynthesizedStack {
        name: MAIN_STACK.to_string(),
        environment: config.environment(),
        graph,
        template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{Manifest, Quantity};
    use serde_json::json;

    const URI: &str = "123456789012.dkr.ecr.eu-north-1.amazonaws.com/infrastructure-ecr";

    fn stack() -> SynthesizedStack {
        synthesize(&InfraConfig::default(), &RepositoryUri::new(URI)).unwrap()
    }

    fn deployment<'a>(stack: &'a SynthesizedStack, id: &str) -> &'a Deployment {
        let node = stack.graph.node(stack.graph.find(id).unwrap());
        match node.manifest() {
            Some(Manifest::Deployment(d)) => d,
            other => panic!("{} is not a deployment: {:?}", id, other),
        }
    }

    #[test]
    fn test_declared_logical_ids() {
        let stack = stack();
        for id in [
            VPC_ID,
            NODE_ROLE_ID,
            CLUSTER_ROLE_ID,
            CLUSTER_ID,
            NODE_GROUP_ID,
            "MetricsServer",
            "MetricsService",
            "NvidiaDevicePluginManifest",
            "AwsAuth",
            "SreNamespace",
            "PortalNamespace",
            "PortalDeployment",
            "PortalService",
            "DataplatformNamespace",
            "DataplatformDeployment",
            "DataplatformService",
        ] {
            assert!(stack.template.resource(id).is_some(), "missing {}", id);
        }
        assert_eq!(stack.manifests().len(), 11);
    }

    #[test]
    fn test_roles() {
        let stack = stack();
        let node = stack.template.resource(NODE_ROLE_ID).unwrap();
        assert_eq!(
            node.properties["ManagedPolicyArns"].as_array().unwrap().len(),
            4
        );

        let cluster = stack.template.resource(CLUSTER_ROLE_ID).unwrap();
        assert_eq!(cluster.properties["RoleName"], CLUSTER_ROLE_ID);
        assert_eq!(
            cluster.properties["ManagedPolicyArns"][0],
            json!({"Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/AmazonEKSClusterPolicy"})
        );
        assert_eq!(
            cluster.properties["ManagedPolicyArns"].as_array().unwrap().len(),
            5
        );
    }

    #[test]
    fn test_cluster_and_output() {
        let stack = stack();
        let cluster = stack.template.resource(CLUSTER_ID).unwrap();
        assert_eq!(cluster.properties["Version"], "1.31");
        assert!(stack
            .template
            .resource("InfrastructureNodegroupDefaultCapacity")
            .is_none());
        assert_eq!(
            stack.output(CLUSTER_NAME_OUTPUT).unwrap().value,
            json!({"Ref": "Infrastructure"})
        );
    }

    #[test]
    fn test_portal_chain() {
        let stack = stack();
        let g = &stack.graph;
        let ns = g.find("PortalNamespace").unwrap();
        let dep = g.find("PortalDeployment").unwrap();
        let svc = g.find("PortalService").unwrap();
        assert!(g.depends_on(dep, ns));
        assert!(g.depends_on(svc, dep));

        let portal = deployment(&stack, "PortalDeployment");
        let container = &portal.spec.template.spec.containers[0];
        assert_eq!(container.image, format!("{}:portal-ui-v1", URI));
        assert_eq!(container.ports[0].container_port, 8000);
        assert_eq!(portal.spec.replicas, Some(1));
    }

    #[test]
    fn test_dataplatform_gpu_and_anchor() {
        let stack = stack();
        let dp = deployment(&stack, "DataplatformDeployment");
        let pod = &dp.spec.template.spec;
        assert!(pod.tolerations.contains(&Toleration::gpu()));

        let resources = pod.containers[0].resources.as_ref().unwrap();
        assert_eq!(resources.requests[GPU_RESOURCE], Quantity::Count(1));
        assert_eq!(resources.limits[GPU_RESOURCE], Quantity::Count(1));
        assert_eq!(resources.limits["memory"], Quantity::from("15Gi"));

        let g = &stack.graph;
        let ns = g.find("DataplatformNamespace").unwrap();
        let dep = g.find("DataplatformDeployment").unwrap();
        let svc = g.find("DataplatformService").unwrap();
        assert!(g.depends_on(svc, ns));
        assert!(!g.depends_transitively(svc, dep));
    }

    #[test]
    fn test_aws_auth_grants_admin() {
        let stack = stack();
        let auth = stack.template.resource("AwsAuth").unwrap();
        let manifest = auth.properties["Manifest"]["Fn::Sub"].as_str().unwrap();
        assert!(manifest.contains("${GpuNodeRole.Arn}"));
        assert!(manifest.contains("arn:aws:iam::AccountId:user/cli-user"));
        assert!(manifest.contains("system:masters"));
        assert!(!manifest.contains("DefaultCapacityRole"));
    }

    #[test]
    fn test_default_capacity_role_joins_cluster() {
        let mut config = InfraConfig::default();
        config.cluster.default_capacity = 2;
        let stack = synthesize(&config, &RepositoryUri::new(URI)).unwrap();

        let group = stack
            .template
            .resource("InfrastructureNodegroupDefaultCapacity")
            .unwrap();
        assert_eq!(
            group.properties["NodeRole"],
            json!({"Fn::GetAtt": ["InfrastructureDefaultCapacityRole", "Arn"]})
        );

        let auth = stack.template.resource("AwsAuth").unwrap();
        let manifest = auth.properties["Manifest"]["Fn::Sub"].as_str().unwrap();
        assert!(manifest.contains("${GpuNodeRole.Arn}"));
        assert!(manifest.contains("${InfrastructureDefaultCapacityRole.Arn}"));
    }

    #[test]
    fn test_node_group_sizing() {
        let stack = stack();
        let ng = stack.template.resource(NODE_GROUP_ID).unwrap();
        let scaling = &ng.properties["ScalingConfig"];
        let (min, desired, max) = (
            scaling["MinSize"].as_u64().unwrap(),
            scaling["DesiredSize"].as_u64().unwrap(),
            scaling["MaxSize"].as_u64().unwrap(),
        );
        assert!(min <= desired && desired <= max);
        assert_eq!((min, desired, max), (1, 1, 2));
        assert_eq!(ng.properties["InstanceTypes"], json!(["g4dn.xlarge"]));
    }

    #[test]
    fn test_manifests_follow_dependencies() {
        let stack = stack();
        let order: Vec<(&str, &str)> = stack
            .manifests()
            .iter()
            .map(|m| (m.kind(), m.name()))
            .collect();
        let position = |kind: &str, name: &str| {
            order
                .iter()
                .position(|(k, n)| *k == kind && *n == name)
                .unwrap()
        };

        assert!(position("Namespace", "portal") < position("Deployment", "portal"));
        assert!(position("Deployment", "portal") < position("Service", "portal"));
        assert!(position("Namespace", "dataplatform") < position("Service", "dataplatform"));
    }

    #[test]
    fn test_system_manifests() {
        let stack = stack();
        let metrics = deployment(&stack, "MetricsServer");
        assert_eq!(metrics.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(metrics.spec.template.spec.host_network, Some(true));
        assert_eq!(
            metrics.spec.template.spec.containers[0].args[1],
            "--secure-port=4443"
        );

        let bundle = stack.manifest_bundle().unwrap();
        assert!(bundle.contains("nvcr.io/nvidia/k8s-device-plugin:v0.13.0"));
        assert!(bundle.contains("kind: DaemonSet"));
    }
}
