//! VPC with one public and one private subnet per availability zone

use std::net::Ipv4Addr;

use serde_json::{json, Value};

use super::DeclarationError;
use crate::graph::{NodeId, StackGraph};
use crate::template::{intrinsic, CfnResource};

pub const DEFAULT_CIDR: &str = "10.0.0.0/16";

/// Subnet groups carved out of the VPC range, in allocation order
const SUBNET_GROUPS: [SubnetGroup; 2] = [SubnetGroup::Public, SubnetGroup::Private];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubnetGroup {
    Public,
    Private,
}

impl SubnetGroup {
    fn label(&self) -> &'static str {
        match self {
            SubnetGroup::Public => "Public",
            SubnetGroup::Private => "Private",
        }
    }

    /// Tag that lets the cluster place load balancers in the subnet
    fn elb_role_tag(&self) -> &'static str {
        match self {
            SubnetGroup::Public => "kubernetes.io/role/elb",
            SubnetGroup::Private => "kubernetes.io/role/internal-elb",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vpc {
    pub cidr: String,
    pub max_azs: usize,
}

/// Logical ids the cluster and node groups attach to
#[derive(Debug, Clone, PartialEq)]
pub struct VpcRefs {
    pub vpc: NodeId,
    pub public_subnets: Vec<NodeId>,
    pub private_subnets: Vec<NodeId>,
    /// Private default routes; nodes need them before they can join
    pub private_routes: Vec<NodeId>,
}

impl Default for Vpc {
    fn default() -> Self {
        Self {
            cidr: DEFAULT_CIDR.to_string(),
            max_azs: 3,
        }
    }
}

/// Parse `a.b.c.d/n` into base address and prefix. Host bits must be zero.
pub fn parse_cidr(cidr: &str) -> Result<(u32, u8), DeclarationError> {
    let invalid = || DeclarationError::InvalidCidr(cidr.to_string());
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if !(1..=28).contains(&prefix) {
        return Err(invalid());
    }
    let base = u32::from(addr);
    if base & !(u32::MAX << (32 - prefix)) != 0 {
        return Err(invalid());
    }
    Ok((base, prefix))
}

/// Split `cidr` into `count` equal blocks, the smallest prefix that fits
pub fn carve_subnets(cidr: &str, count: usize) -> Result<Vec<String>, DeclarationError> {
    let (base, prefix) = parse_cidr(cidr)?;
    let exhausted = || DeclarationError::AddressSpaceExhausted {
        cidr: cidr.to_string(),
        subnets: count,
    };
    let count = u32::try_from(count).map_err(|_| exhausted())?;
    let bits = count.max(1).next_power_of_two().trailing_zeros() as u8;
    let mask = prefix + bits;
    if mask > 28 {
        return Err(exhausted());
    }
    let size = 1u32 << (32 - mask);
    (0..count)
        .map(|i| -> Result<String, DeclarationError> {
            let start = i
                .checked_mul(size)
                .and_then(|offset| base.checked_add(offset))
                .ok_or_else(exhausted)?;
            Ok(format!("{}/{}", Ipv4Addr::from(start), mask))
        })
        .collect()
}

fn name_tags(stack: &str, path: &str, extra: Option<(&str, &str)>) -> Value {
    let mut tags = vec![json!({ "Key": "Name", "Value": format!("{}/{}", stack, path) })];
    if let Some((key, value)) = extra {
        tags.push(json!({ "Key": key, "Value": value }));
    }
    Value::Array(tags)
}

impl Vpc {
    /// Declare the VPC and its routing under the `id` prefix
    pub fn declare(
        &self,
        graph: &mut StackGraph,
        stack: &str,
        id: &str,
    ) -> Result<VpcRefs, DeclarationError> {
        let azs = self.max_azs.max(1);
        let blocks = carve_subnets(&self.cidr, azs * SUBNET_GROUPS.len())?;

        let vpc = graph.add_resource(
            id,
            CfnResource::new(
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": self.cidr,
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "InstanceTenancy": "default",
                    "Tags": name_tags(stack, id, None),
                }),
            ),
        )?;
        let vpc_ref = intrinsic::reference(id);

        let igw_id = format!("{}IGW", id);
        graph.add_resource(
            &igw_id,
            CfnResource::new(
                "AWS::EC2::InternetGateway",
                json!({ "Tags": name_tags(stack, id, None) }),
            ),
        )?;
        let gw_attachment_id = format!("{}VPCGW", id);
        let gw_attachment = graph.add_resource(
            &gw_attachment_id,
            CfnResource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": vpc_ref,
                    "InternetGatewayId": intrinsic::reference(&igw_id),
                }),
            ),
        )?;

        let mut refs = VpcRefs {
            vpc,
            public_subnets: Vec::with_capacity(azs),
            private_subnets: Vec::with_capacity(azs),
            private_routes: Vec::with_capacity(azs),
        };
        let mut nat_gateways = Vec::with_capacity(azs);
        let mut blocks = blocks.into_iter();

        for group in SUBNET_GROUPS {
            for az in 0..azs {
                let prefix = format!("{}{}Subnet{}", id, group.label(), az + 1);
                let path = format!("{}/{}Subnet{}", id, group.label(), az + 1);
                let subnet_id = format!("{}Subnet", prefix);
                let block = blocks.next().ok_or_else(|| {
                    DeclarationError::AddressSpaceExhausted {
                        cidr: self.cidr.clone(),
                        subnets: azs * SUBNET_GROUPS.len(),
                    }
                })?;

                let subnet = graph.add_resource(
                    &subnet_id,
                    CfnResource::new(
                        "AWS::EC2::Subnet",
                        json!({
                            "VpcId": vpc_ref,
                            "AvailabilityZone": intrinsic::select_az(az),
                            "CidrBlock": block,
                            "MapPublicIpOnLaunch": group == SubnetGroup::Public,
                            "Tags": name_tags(stack, &path, Some((group.elb_role_tag(), "1"))),
                        }),
                    ),
                )?;

                let table_id = format!("{}RouteTable", prefix);
                graph.add_resource(
                    &table_id,
                    CfnResource::new(
                        "AWS::EC2::RouteTable",
                        json!({ "VpcId": vpc_ref, "Tags": name_tags(stack, &path, None) }),
                    ),
                )?;
                graph.add_resource(
                    &format!("{}RouteTableAssociation", prefix),
                    CfnResource::new(
                        "AWS::EC2::SubnetRouteTableAssociation",
                        json!({
                            "RouteTableId": intrinsic::reference(&table_id),
                            "SubnetId": intrinsic::reference(&subnet_id),
                        }),
                    ),
                )?;

                match group {
                    SubnetGroup::Public => {
                        graph.add_resource_after(
                            &format!("{}DefaultRoute", prefix),
                            CfnResource::new(
                                "AWS::EC2::Route",
                                json!({
                                    "RouteTableId": intrinsic::reference(&table_id),
                                    "DestinationCidrBlock": "0.0.0.0/0",
                                    "GatewayId": intrinsic::reference(&igw_id),
                                }),
                            ),
                            &[gw_attachment],
                        )?;
                        let eip_id = format!("{}EIP", prefix);
                        graph.add_resource(
                            &eip_id,
                            CfnResource::new(
                                "AWS::EC2::EIP",
                                json!({ "Domain": "vpc", "Tags": name_tags(stack, &path, None) }),
                            ),
                        )?;
                        let nat_id = format!("{}NATGateway", prefix);
                        graph.add_resource_after(
                            &nat_id,
                            CfnResource::new(
                                "AWS::EC2::NatGateway",
                                json!({
                                    "SubnetId": intrinsic::reference(&subnet_id),
                                    "AllocationId": intrinsic::get_att(&eip_id, "AllocationId"),
                                    "Tags": name_tags(stack, &path, None),
                                }),
                            ),
                            &[gw_attachment],
                        )?;
                        nat_gateways.push(nat_id);
                        refs.public_subnets.push(subnet);
                    }
                    SubnetGroup::Private => {
                        let nat_id = &nat_gateways[az];
                        let route = graph.add_resource(
                            &format!("{}DefaultRoute", prefix),
                            CfnResource::new(
                                "AWS::EC2::Route",
                                json!({
                                    "RouteTableId": intrinsic::reference(&table_id),
                                    "DestinationCidrBlock": "0.0.0.0/0",
                                    "NatGatewayId": intrinsic::reference(nat_id),
                                }),
                            ),
                        )?;
                        refs.private_subnets.push(subnet);
                        refs.private_routes.push(route);
                    }
                }
            }
        }

        Ok(refs)
    }
}
