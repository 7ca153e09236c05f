//! Registry stack, deployed once ahead of the cluster

use tracing::info;

use super::{StackError, SynthesizedStack, BASE_STACK};
use crate::cloud::{LifecycleRule, Repository};
use crate::config::InfraConfig;
use crate::graph::{render_template, RenderOptions, StackGraph};
use crate::template::{intrinsic, Output};

pub const REPOSITORY_ID: &str = "InfrastructureEcrRepository";
pub const REPOSITORY_URI_OUTPUT: &str = "EcrRepositoryUri";

pub fn synthesize(config: &InfraConfig) -> Result<SynthesizedStack, StackError> {
    let repository = Repository::new(&config.registry.name)
        .with_rule(LifecycleRule::keep_last(config.registry.max_image_count));

    let mut graph = StackGraph::new();
    graph.add_resource(REPOSITORY_ID, repository.to_resource()?)?;

    let options = RenderOptions {
        description: Some("Container registry for cluster workloads".to_string()),
        ..Default::default()
    };
    let mut template = render_template(&graph, &options)?;
    template.outputs.insert(
        REPOSITORY_URI_OUTPUT.to_string(),
        Output::new(intrinsic::get_att(REPOSITORY_ID, "RepositoryUri"))
            .with_description("ECR Repository URI"),
    );

    info!(
        "Synthesized {} ({} resources)",
        BASE_STACK,
        template.resources.len()
    );

    Ok(SynthesizedStack {
        name: BASE_STACK.to_string(),
        environment: config.environment(),
        graph,
        template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_registry_keeps_ten_images() {
        let stack = synthesize(&InfraConfig::default()).unwrap();
        let repo = stack.template.resource(REPOSITORY_ID).unwrap();

        assert_eq!(repo.property("RepositoryName"), Some(&json!("infrastructure-ecr")));
        let text = repo.properties["LifecyclePolicy"]["LifecyclePolicyText"]
            .as_str()
            .unwrap();
        let policy: Value = serde_json::from_str(text).unwrap();
        assert_eq!(policy["rules"].as_array().unwrap().len(), 1);
        assert_eq!(policy["rules"][0]["selection"]["countNumber"], 10);
        assert_eq!(policy["rules"][0]["description"], "Keep only the last 10 images");
    }

    #[test]
    fn test_uri_output() {
        let stack = synthesize(&InfraConfig::default()).unwrap();
        let output = stack.output(REPOSITORY_URI_OUTPUT).unwrap();
        assert_eq!(
            output.value,
            json!({"Fn::GetAtt": ["InfrastructureEcrRepository", "RepositoryUri"]})
        );
        assert_eq!(output.description.as_deref(), Some("ECR Repository URI"));
    }

    #[test]
    fn test_no_manifests_no_parameters() {
        let stack = synthesize(&InfraConfig::default()).unwrap();
        assert!(stack.manifests().is_empty());
        assert!(stack.template.parameters.is_empty());
        assert_eq!(stack.name, "InfrastructureBaseStack");
    }

    #[test]
    fn test_zero_retention_fails() {
        let mut config = InfraConfig::default();
        config.registry.max_image_count = 0;
        assert!(matches!(
            synthesize(&config),
            Err(StackError::Declaration(_))
        ));
    }
}
