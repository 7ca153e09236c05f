//! Managed Kubernetes: cluster, managed node groups and the aws-auth mapping

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::{DeclarationError, Role, VpcRefs};
use crate::graph::{ClusterRef, NodeId, StackGraph};
use crate::k8s::{ConfigMap, ObjectMeta};
use crate::template::{intrinsic, CfnResource};

/// Instance type of the optional default node group
/// Managed policies of the default capacity node role
pub const DEFAULT_CAPACITY_POLICIES: [&str; 3] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
];

pub const DEFAULT_CAPACITY_INSTANCE: &str = "m5.large";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("sizing must satisfy min ({min}) <= desired ({desired}) <= max ({max}) with max >= 1")]
pub struct SizingError {
    pub min: u32,
    pub desired: u32,
    pub max: u32,
}

/// Node group size bounds; only constructible when `min <= desired <= max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScaling", into = "RawScaling")]
pub struct ScalingConfig {
    min_size: u32,
    desired_size: u32,
    max_size: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawScaling {
    min_size: u32,
    desired_size: u32,
    max_size: u32,
}

impl TryFrom<RawScaling> for ScalingConfig {
    type Error = SizingError;

    fn try_from(raw: RawScaling) -> Result<Self, Self::Error> {
        ScalingConfig::new(raw.min_size, raw.desired_size, raw.max_size)
    }
}

impl From<ScalingConfig> for RawScaling {
    fn from(s: ScalingConfig) -> Self {
        RawScaling {
            min_size: s.min_size,
            desired_size: s.desired_size,
            max_size: s.max_size,
        }
    }
}

impl ScalingConfig {
    /// One GPU node, bursting to two
    pub const GPU_DEFAULT: ScalingConfig = ScalingConfig {
        min_size: 1,
        desired_size: 1,
        max_size: 2,
    };

    pub fn new(min_size: u32, desired_size: u32, max_size: u32) -> Result<Self, SizingError> {
        if max_size == 0 || min_size > desired_size || desired_size > max_size {
            return Err(SizingError {
                min: min_size,
                desired: desired_size,
                max: max_size,
            });
        }
        Ok(Self {
            min_size,
            desired_size,
            max_size,
        })
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn desired_size(&self) -> u32 {
        self.desired_size
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmiType {
    #[serde(rename = "AL2_x86_64")]
    Al2X86_64,
    #[serde(rename = "AL2_x86_64_GPU")]
    Al2X86_64Gpu,
    #[serde(rename = "AL2_ARM_64")]
    Al2Arm64,
    #[serde(rename = "BOTTLEROCKET_x86_64_NVIDIA")]
    BottlerocketX86_64Nvidia,
}

impl AmiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmiType::Al2X86_64 => "AL2_x86_64",
            AmiType::Al2X86_64Gpu => "AL2_x86_64_GPU",
            AmiType::Al2Arm64 => "AL2_ARM_64",
            AmiType::BottlerocketX86_64Nvidia => "BOTTLEROCKET_x86_64_NVIDIA",
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, AmiType::Al2X86_64Gpu | AmiType::BottlerocketX86_64Nvidia)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityType {
    #[default]
    OnDemand,
    Spot,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityType::OnDemand => "ON_DEMAND",
            CapacityType::Spot => "SPOT",
        }
    }
}

/// A managed node group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub name: String,
    pub instance_types: Vec<String>,
    pub scaling: ScalingConfig,
    pub ami_type: AmiType,
    #[serde(default)]
    pub capacity_type: CapacityType,
    /// Root volume size in GiB
    pub disk_size: u32,
}

impl NodeGroup {
    pub fn declare(
        &self,
        graph: &mut StackGraph,
        id: &str,
        cluster: ClusterRef,
        node_role: NodeId,
        vpc: &VpcRefs,
    ) -> Result<NodeId, DeclarationError> {
        let cluster_id = graph.logical_id(cluster.node()).to_string();
        let role_id = graph.logical_id(node_role).to_string();
        let subnets: Vec<_> = vpc
            .private_subnets
            .iter()
            .map(|s| intrinsic::reference(graph.logical_id(*s)))
            .collect();

        let resource = CfnResource::new(
            "AWS::EKS::Nodegroup",
            json!({
                "ClusterName": intrinsic::reference(&cluster_id),
                "NodeRole": intrinsic::get_att(&role_id, "Arn"),
                "Subnets": subnets,
                "NodegroupName": self.name,
                "InstanceTypes": self.instance_types,
                "AmiType": self.ami_type.as_str(),
                "CapacityType": self.capacity_type.as_str(),
                "DiskSize": self.disk_size,
                "ScalingConfig": {
                    "MinSize": self.scaling.min_size(),
                    "MaxSize": self.scaling.max_size(),
                    "DesiredSize": self.scaling.desired_size(),
                },
            }),
        );

        let mut after = vec![cluster.node(), node_role];
        after.extend(vpc.private_routes.iter().copied());
        Ok(graph.add_resource_after(id, resource, &after)?)
    }
}

/// The control plane
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub name: Option<String>,
    pub version: String,
    /// Instances in an implicit default node group; zero leaves capacity to explicit groups
    pub default_capacity: u32,
}

impl Cluster {
    /// Declare the cluster under `id`. A positive default capacity also
    /// declares `<id>DefaultCapacityRole` and `<id>NodegroupDefaultCapacity`;
    /// that role must be mapped in `aws-auth` for the nodes to join.
    pub fn declare(
        &self,
        graph: &mut StackGraph,
        id: &str,
        role: NodeId,
        vpc: &VpcRefs,
    ) -> Result<DeclaredCluster, DeclarationError> {
        let role_id = graph.logical_id(role).to_string();
        let subnets: Vec<_> = vpc
            .public_subnets
            .iter()
            .chain(vpc.private_subnets.iter())
            .map(|s| intrinsic::reference(graph.logical_id(*s)))
            .collect();

        let mut properties = json!({
            "Version": self.version,
            "RoleArn": intrinsic::get_att(&role_id, "Arn"),
            "ResourcesVpcConfig": {
                "SubnetIds": subnets,
                "EndpointPublicAccess": true,
                "EndpointPrivateAccess": true,
            },
        });
        if let Some(name) = &self.name {
            properties["Name"] = json!(name);
        }

        let cluster = graph.add_cluster(id, CfnResource::new("AWS::EKS::Cluster", properties))?;
        graph.add_dependency(cluster.node(), role)?;
        for route in &vpc.private_routes {
            graph.add_dependency(cluster.node(), *route)?;
        }

        let mut default_capacity_role = None;
        if self.default_capacity > 0 {
            let node_role = graph.add_resource(
                &format!("{}DefaultCapacityRole", id),
                Role::assumed_by("ec2.amazonaws.com")
                    .with_managed_policies(DEFAULT_CAPACITY_POLICIES)
                    .to_resource(),
            )?;
            default_capacity_role = Some(node_role);

            let default_group = NodeGroup {
                name: format!("{}-default", id.to_lowercase()),
                instance_types: vec![DEFAULT_CAPACITY_INSTANCE.to_string()],
                scaling: ScalingConfig::new(
                    self.default_capacity,
                    self.default_capacity,
                    self.default_capacity,
                )?,
                ami_type: AmiType::Al2X86_64,
                capacity_type: CapacityType::OnDemand,
                disk_size: 20,
            };
            default_group.declare(
                graph,
                &format!("{}NodegroupDefaultCapacity", id),
                cluster,
                node_role,
                vpc,
            )?;
        }

        Ok(DeclaredCluster {
            cluster,
            default_capacity_role,
        })
    }
}

/// A declared cluster and the node role of its default capacity, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredCluster {
    pub cluster: ClusterRef,
    pub default_capacity_role: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RoleMapping {
    rolearn: String,
    username: String,
    groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserMapping {
    userarn: String,
    username: String,
    groups: Vec<String>,
}

/// Identity-to-group mappings stored in the `aws-auth` config map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwsAuth {
    roles: Vec<RoleMapping>,
    users: Vec<UserMapping>,
}

impl AwsAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let instances of a node role join the cluster
    pub fn add_node_role(&mut self, role_logical_id: &str) {
        self.roles.push(RoleMapping {
            rolearn: format!("${{{}.Arn}}", role_logical_id),
            username: "system:node:{{EC2PrivateDNSName}}".to_string(),
            groups: vec![
                "system:bootstrappers".to_string(),
                "system:nodes".to_string(),
            ],
        });
    }

    pub fn add_user_mapping<I, S>(&mut self, user_arn: &str, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.push(UserMapping {
            userarn: user_arn.to_string(),
            username: user_arn.to_string(),
            groups: groups.into_iter().map(Into::into).collect(),
        });
    }

    /// Whether instances of this node role may join
    pub fn maps_node_role(&self, role_logical_id: &str) -> bool {
        let arn = format!("${{{}.Arn}}", role_logical_id);
        self.roles.iter().any(|r| r.rolearn == arn)
    }

    /// Groups granted to a mapped user
    pub fn user_groups(&self, user_arn: &str) -> Option<&[String]> {
        self.users
            .iter()
            .find(|u| u.userarn == user_arn)
            .map(|u| u.groups.as_slice())
    }

    pub fn to_config_map(&self) -> Result<ConfigMap, DeclarationError> {
        Ok(
            ConfigMap::new(ObjectMeta::namespaced("aws-auth", "kube-system"))
                .with_data("mapRoles", serde_yaml::to_string(&self.roles)?)
                .with_data("mapUsers", serde_yaml::to_string(&self.users)?)
                .with_data("mapAccounts", "[]\n"),
        )
    }
}
