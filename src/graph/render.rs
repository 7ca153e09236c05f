//! Render a stack graph into a CloudFormation template

use serde_json::json;

use super::{NodeBody, StackGraph};
use crate::template::{intrinsic, CfnResource, Parameter, Template, TemplateError};

/// Resource type the kubectl provider handles
pub const KUBERNETES_RESOURCE_TYPE: &str = "Custom::AWSCDK-EKS-KubernetesResource";

/// Template parameters wiring manifest resources to the kubectl provider
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub description: Option<String>,
    pub service_token_parameter: String,
    pub kubectl_role_parameter: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            description: None,
            service_token_parameter: "KubectlProviderServiceToken".to_string(),
            kubectl_role_parameter: "KubectlRoleArn".to_string(),
        }
    }
}

/// Convert every node into a template resource, keeping explicit edges as `DependsOn`
pub fn render_template(
    graph: &StackGraph,
    options: &RenderOptions,
) -> Result<Template, TemplateError> {
    let mut template = Template {
        description: options.description.clone(),
        ..Default::default()
    };

    let has_manifests = graph.nodes().any(|(_, n)| n.manifest().is_some());
    if has_manifests {
        template.parameters.insert(
            options.service_token_parameter.clone(),
            Parameter {
                parameter_type: "String".to_string(),
                description: Some("Service token of the kubectl provider".to_string()),
            },
        );
        template.parameters.insert(
            options.kubectl_role_parameter.clone(),
            Parameter {
                parameter_type: "String".to_string(),
                description: Some(
                    "Role the kubectl provider assumes to apply manifests".to_string(),
                ),
            },
        );
    }

    let cluster_id = graph.cluster().map(|c| graph.logical_id(c.node()).to_string());

    for (_, node) in graph.nodes() {
        let mut resource = match &node.body {
            NodeBody::Cloud(resource) => resource.clone(),
            NodeBody::Manifest(manifest) => {
                let document = serde_json::to_string(&[manifest])?;
                // ${Logical.Attr} placeholders are resolved by the provider at deploy time
                let document = if document.contains("${") {
                    intrinsic::sub(&document)
                } else {
                    json!(document)
                };
                let mut properties = json!({
                    "ServiceToken": intrinsic::reference(&options.service_token_parameter),
                    "Manifest": document,
                    "RoleArn": intrinsic::reference(&options.kubectl_role_parameter),
                });
                if let Some(cluster) = &cluster_id {
                    properties["ClusterName"] = intrinsic::reference(cluster);
                }
                CfnResource::new(KUBERNETES_RESOURCE_TYPE, properties)
            }
        };

        for dep in node.dependencies() {
            let dep_id = graph.logical_id(dep).to_string();
            if !resource.depends_on.contains(&dep_id) {
                resource.depends_on.push(dep_id);
            }
        }
        template.resources.insert(node.logical_id.clone(), resource);
    }

    Ok(template)
}
