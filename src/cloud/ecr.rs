//! Container registry

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::DeclarationError;
use crate::template::CfnResource;

/// Expire images beyond the newest `max_image_count`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub max_image_count: u32,
}

impl LifecycleRule {
    pub fn keep_last(max_image_count: u32) -> Self {
        Self {
            description: Some(format!("Keep only the last {} images", max_image_count)),
            max_image_count,
        }
    }
}

/// An ECR repository
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub name: String,
    pub lifecycle_rules: Vec<LifecycleRule>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle_rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: LifecycleRule) -> Self {
        self.lifecycle_rules.push(rule);
        self
    }

    /// The tightest image cap across all rules
    pub fn max_retained_images(&self) -> Option<u32> {
        self.lifecycle_rules.iter().map(|r| r.max_image_count).min()
    }

    /// Lifecycle policy document as the registry expects it
    pub fn lifecycle_policy_text(&self) -> Result<String, DeclarationError> {
        let mut rules = Vec::with_capacity(self.lifecycle_rules.len());
        for (i, rule) in self.lifecycle_rules.iter().enumerate() {
            if rule.max_image_count == 0 {
                return Err(DeclarationError::EmptyRetention);
            }
            let mut entry = json!({
                "rulePriority": i + 1,
                "selection": {
                    "tagStatus": "any",
                    "countType": "imageCountMoreThan",
                    "countNumber": rule.max_image_count,
                },
                "action": { "type": "expire" },
            });
            if let Some(description) = &rule.description {
                entry["description"] = json!(description);
            }
            rules.push(entry);
        }
        Ok(serde_json::to_string(&json!({ "rules": rules }))?)
    }

    pub fn to_resource(&self) -> Result<CfnResource, DeclarationError> {
        let mut properties = json!({ "RepositoryName": self.name });
        if !self.lifecycle_rules.is_empty() {
            properties["LifecyclePolicy"] = json!({
                "LifecyclePolicyText": self.lifecycle_policy_text()?,
            });
        }
        Ok(CfnResource::new("AWS::ECR::Repository", properties).retained())
    }
}
