//! CloudFormation template model
//!
//! The template is the deployment artifact handed to the provider's engine.
//! Its schema belongs to the provider; this module only covers the sections
//! the stacks emit.

pub mod intrinsic;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const FORMAT_VERSION: &str = "2010-09-09";

/// Errors raised while rendering a template
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("JSON render error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML render error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Output serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Json => "json",
            TemplateFormat::Yaml => "yaml",
        }
    }
}

/// A single declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,

    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

impl CfnResource {
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
            update_replace_policy: None,
            deletion_policy: None,
        }
    }

    /// Keep the physical resource when the stack is deleted or the resource replaced
    pub fn retained(mut self) -> Self {
        self.update_replace_policy = Some("Retain".to_string());
        self.deletion_policy = Some("Retain".to_string());
        self
    }

    /// Resource with no properties
    pub fn bare(resource_type: impl Into<String>) -> Self {
        Self::new(resource_type, Value::Null)
    }

    /// Look up a top-level property
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A complete template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,

    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, CfnResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: None,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl Template {
    pub fn resource(&self, logical_id: &str) -> Option<&CfnResource> {
        self.resources.get(logical_id)
    }

    /// All resources of a given type, by logical id
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a CfnResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn render(&self, format: TemplateFormat) -> Result<String, TemplateError> {
        Ok(match format {
            TemplateFormat::Json => serde_json::to_string_pretty(self)?,
            TemplateFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }
}

/// Hex-encoded sha256 of rendered template text
pub fn content_hash(rendered: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Template {
        let mut template = Template::default();
        template.resources.insert(
            "Repo".to_string(),
            CfnResource::new(
                "AWS::ECR::Repository",
                json!({"RepositoryName": "infrastructure-ecr"}),
            ),
        );
        let mut igw = CfnResource::bare("AWS::EC2::InternetGateway");
        igw.depends_on.push("Repo".to_string());
        template.resources.insert("Igw".to_string(), igw);
        template.outputs.insert(
            "EcrRepositoryUri".to_string(),
            Output::new(intrinsic::get_att("Repo", "RepositoryUri"))
                .with_description("ECR Repository URI"),
        );
        template
    }

    #[test]
    fn test_render_json_sections() {
        let rendered = sample().render(TemplateFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Resources"]["Repo"]["Type"], "AWS::ECR::Repository");
        assert!(value["Resources"]["Igw"].get("Properties").is_none());
        assert_eq!(value["Resources"]["Igw"]["DependsOn"][0], "Repo");
        assert!(value.get("Parameters").is_none());
        assert_eq!(
            value["Outputs"]["EcrRepositoryUri"]["Description"],
            "ECR Repository URI"
        );
    }

    #[test]
    fn test_render_yaml() {
        let rendered = sample().render(TemplateFormat::Yaml).unwrap();
        assert!(rendered.contains("AWS::ECR::Repository"));
        let back: Template = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_resources_of_type() {
        let template = sample();
        let repos: Vec<_> = template.resources_of_type("AWS::ECR::Repository").collect();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].0, "Repo");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash("abc");
        assert_eq!(a.len(), 64);
        assert_eq!(
            a,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
