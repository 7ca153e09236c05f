//! IAM roles built from service principals and AWS managed policies

use serde_json::{json, Value};

use crate::template::{intrinsic, CfnResource};

/// A role assumable by one or more AWS services
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    /// Physical name; generated by the provider when absent
    pub name: Option<String>,
    pub service_principals: Vec<String>,
    pub managed_policies: Vec<String>,
}

impl Role {
    pub fn assumed_by(service: impl Into<String>) -> Self {
        Self {
            name: None,
            service_principals: vec![service.into()],
            managed_policies: Vec::new(),
        }
    }

    /// Role trusted by several services at once
    pub fn assumed_by_all<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            service_principals: services.into_iter().map(Into::into).collect(),
            managed_policies: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_managed_policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.managed_policies
            .extend(policies.into_iter().map(Into::into));
        self
    }

    pub fn has_policy(&self, policy: &str) -> bool {
        self.managed_policies.iter().any(|p| p == policy)
    }

    fn trust_policy(&self) -> Value {
        let service = match self.service_principals.as_slice() {
            [single] => json!(single),
            many => json!(many),
        };
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": service },
            }],
        })
    }

    pub fn to_resource(&self) -> CfnResource {
        let arns: Vec<Value> = self
            .managed_policies
            .iter()
            .map(|p| intrinsic::managed_policy_arn(p))
            .collect();
        let mut properties = json!({
            "AssumeRolePolicyDocument": self.trust_policy(),
            "ManagedPolicyArns": arns,
        });
        if let Some(name) = &self.name {
            properties["RoleName"] = json!(name);
        }
        CfnResource::new("AWS::IAM::Role", properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_principal() {
        let role = Role::assumed_by("ec2.amazonaws.com")
            .with_managed_policies(["AmazonEKSWorkerNodePolicy"]);
        let resource = role.to_resource();
        let doc = &resource.properties["AssumeRolePolicyDocument"];

        assert_eq!(doc["Statement"][0]["Principal"]["Service"], "ec2.amazonaws.com");
        assert_eq!(
            resource.properties["ManagedPolicyArns"][0],
            json!({"Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/AmazonEKSWorkerNodePolicy"})
        );
        assert!(resource.property("RoleName").is_none());
    }

    #[test]
    fn test_composite_principal() {
        let role = Role::assumed_by_all(["eks.amazonaws.com", "ec2.amazonaws.com"])
            .named("InfrastructureEksClusterRole");
        let resource = role.to_resource();

        assert_eq!(
            resource.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            json!(["eks.amazonaws.com", "ec2.amazonaws.com"])
        );
        assert_eq!(resource.properties["RoleName"], "InfrastructureEksClusterRole");
    }

    #[test]
    fn test_has_policy() {
        let role = Role::assumed_by("ec2.amazonaws.com")
            .with_managed_policies(["AmazonSSMManagedInstanceCore"]);
        assert!(role.has_policy("AmazonSSMManagedInstanceCore"));
        assert!(!role.has_policy("AmazonEKSClusterPolicy"));
    }
}
