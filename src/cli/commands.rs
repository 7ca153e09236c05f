//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use super::RegistryArgs;
use crate::assembly::AssemblyError;
use crate::config::validation::{format_validation_results, report_has_errors};
use crate::config::{
    save_config_to, validate_config, validate_graph, ConfigError, InfraConfig, ValidationResult,
    ValidationSeverity, LOCAL_CONFIG_FILE,
};
use crate::registry::{
    resolve_repository_uri, AwsCliCatalog, FileCatalog, RepositoryCatalog, RepositoryUri,
    ResolveError,
};
use crate::stacks::{self, StackError, StackSelection, SynthesizedStack};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Stack error: {0}")]
    Stack(#[from] StackError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Validation failed:{0}")]
    Validation(String),

    #[error("{0} already exists (use --force to overwrite)")]
    AlreadyExists(PathBuf),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Registry resolution
// ============================================================================

/// Where the registry URI comes from
pub enum RegistrySource {
    /// Given directly; no lookup
    Uri(RepositoryUri),
    /// Looked up by name
    Catalog(Box<dyn RepositoryCatalog>),
}

impl RegistrySource {
    pub fn from_args(args: &RegistryArgs, config: &InfraConfig) -> Self {
        if let Some(uri) = &args.repository_uri {
            return RegistrySource::Uri(RepositoryUri::new(uri.clone()));
        }
        if let Some(path) = &args.repositories_file {
            return RegistrySource::Catalog(Box::new(FileCatalog::new(path)));
        }
        RegistrySource::Catalog(Box::new(
            AwsCliCatalog::new(&config.region).with_profile(config.profile.clone()),
        ))
    }

    /// Resolve the URI of the registry named `name`
    pub async fn resolve(&self, name: &str, account: &str) -> CommandResult<RepositoryUri> {
        match self {
            RegistrySource::Uri(uri) => {
                info!("ECR Repository URI: {} (given)", uri);
                Ok(uri.clone())
            }
            RegistrySource::Catalog(catalog) => {
                Ok(resolve_repository_uri(catalog.as_ref(), name, account).await?)
            }
        }
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Declared stacks plus the registry the main stack was built against
pub struct Synthesis {
    pub stacks: Vec<SynthesizedStack>,
    pub registry: Option<RepositoryUri>,
}

/// Declare and render the selected stacks. The registry is resolved before
/// the main stack is declared; a failed lookup returns before any main
/// stack graph exists.
pub async fn synthesize_stacks(
    config: &InfraConfig,
    selection: StackSelection,
    source: &RegistrySource,
) -> CommandResult<Synthesis> {
    let mut stacks = Vec::new();
    let mut registry = None;

    if selection.includes_base() {
        stacks.push(stacks::base::synthesize(config)?);
    }

    if selection.includes_main() {
        let uri = source
            .resolve(&config.registry.name, &config.account)
            .await?;
        stacks.push(stacks::main::synthesize(config, &uri)?);
        registry = Some(uri);
    }

    Ok(Synthesis { stacks, registry })
}

/// Lint settings and every declared stack. Keys are `config` and
/// `<Stack>/<LogicalId>`.
pub fn validation_report(
    config: &InfraConfig,
    synthesis: &Synthesis,
) -> BTreeMap<String, ValidationResult> {
    let mut report = BTreeMap::new();

    let config_result = validate_config(config);
    if !config_result.messages.is_empty() {
        report.insert("config".to_string(), config_result);
    }

    for stack in &synthesis.stacks {
        for (id, result) in validate_graph(&stack.graph, synthesis.registry.as_ref()) {
            report.insert(format!("{}/{}", stack.name, id), result);
        }
    }

    report
}

/// Log warnings from a report and fail on errors
pub fn enforce_report(report: &BTreeMap<String, ValidationResult>) -> CommandResult<()> {
    for (subject, result) in report {
        for msg in &result.messages {
            if msg.severity == ValidationSeverity::Warning {
                warn!("{} [{}]: {}", subject, msg.code, msg.message);
            }
        }
    }

    if report_has_errors(report.values()) {
        let errors: BTreeMap<String, ValidationResult> = report
            .iter()
            .filter(|(_, r)| r.has_errors())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        return Err(CommandError::Validation(format_validation_results(&errors)));
    }
    Ok(())
}

// ============================================================================
// Listing
// ============================================================================

/// One row of `list` output
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    pub logical_id: String,
    pub type_name: String,
    pub depends_on: Vec<String>,
}

/// Resources of a stack in apply order
pub fn resource_rows(stack: &SynthesizedStack) -> Vec<ResourceRow> {
    let graph = &stack.graph;
    graph
        .topological_order()
        .into_iter()
        .map(|id| {
            let node = graph.node(id);
            ResourceRow {
                logical_id: node.logical_id.clone(),
                type_name: node.type_name().to_string(),
                depends_on: node
                    .dependencies()
                    .map(|d| graph.logical_id(d).to_string())
                    .collect(),
            }
        })
        .collect()
}

// ============================================================================
// Config Commands
// ============================================================================

/// Write built-in defaults to `path` (default `./infrastack.yaml`)
pub fn config_init(path: Option<&str>, force: bool) -> CommandResult<PathBuf> {
    let path = path
        .map(crate::config::expand_path)
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
    write_default_config(&path, force)?;
    Ok(path)
}

fn write_default_config(path: &Path, force: bool) -> CommandResult<()> {
    if path.exists() && !force {
        return Err(CommandError::AlreadyExists(path.to_path_buf()));
    }
    save_config_to(&InfraConfig::default(), path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RepositoryDescription, StaticCatalog};
    use tempfile::TempDir;

    const URI: &str = "123456789012.dkr.ecr.eu-north-1.amazonaws.com/infrastructure-ecr";

    fn catalog_with(names: &[&str]) -> RegistrySource {
        RegistrySource::Catalog(Box::new(StaticCatalog::new(
            names
                .iter()
                .map(|n| RepositoryDescription::new(*n, URI))
                .collect(),
        )))
    }

    #[test]
    fn test_source_from_args() {
        let config = InfraConfig::default();
        let args = RegistryArgs {
            repository_uri: Some(URI.to_string()),
            repositories_file: None,
        };
        assert!(matches!(
            RegistrySource::from_args(&args, &config),
            RegistrySource::Uri(_)
        ));
        assert!(matches!(
            RegistrySource::from_args(&RegistryArgs::default(), &config),
            RegistrySource::Catalog(_)
        ));
    }

    #[tokio::test]
    async fn test_synthesize_all() {
        let config = InfraConfig::default();
        let source = catalog_with(&["infrastructure-ecr"]);
        let synthesis = synthesize_stacks(&config, StackSelection::All, &source)
            .await
            .unwrap();

        assert_eq!(synthesis.stacks.len(), 2);
        assert_eq!(synthesis.stacks[0].name, "InfrastructureBaseStack");
        assert_eq!(synthesis.stacks[1].name, "InfrastructureStack");
        assert_eq!(synthesis.registry.unwrap().as_str(), URI);
    }

    #[tokio::test]
    async fn test_base_needs_no_registry() {
        let config = InfraConfig::default();
        let synthesis = synthesize_stacks(&config, StackSelection::Base, &catalog_with(&[]))
            .await
            .unwrap();
        assert_eq!(synthesis.stacks.len(), 1);
        assert!(synthesis.registry.is_none());
    }

    #[tokio::test]
    async fn test_missing_registry_aborts_main() {
        let config = InfraConfig::default();
        let result =
            synthesize_stacks(&config, StackSelection::Main, &catalog_with(&["other"])).await;
        assert!(matches!(
            result,
            Err(CommandError::Resolve(ResolveError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_report_flags_dataplatform_service() {
        let config = InfraConfig::default();
        let source = catalog_with(&["infrastructure-ecr"]);
        let synthesis = synthesize_stacks(&config, StackSelection::Main, &source)
            .await
            .unwrap();
        let report = validation_report(&config, &synthesis);

        assert!(report["InfrastructureStack/DataplatformService"]
            .has_code("SERVICE_ANCHORED_ON_NAMESPACE"));
        assert!(!report.contains_key("InfrastructureStack/PortalService"));
        assert!(report["config"].has_code("PLACEHOLDER_ACCOUNT"));
        assert!(enforce_report(&report).is_ok());
    }

    #[test]
    fn test_enforce_report_fails_on_errors() {
        let mut report = BTreeMap::new();
        report.insert(
            "config".to_string(),
            ValidationResult::new().error("EMPTY_REGION", "No region configured", None),
        );
        let err = enforce_report(&report).unwrap_err();
        assert!(err.to_string().contains("EMPTY_REGION"));
    }

    #[tokio::test]
    async fn test_resource_rows_in_apply_order() {
        let config = InfraConfig::default();
        let source = catalog_with(&["infrastructure-ecr"]);
        let synthesis = synthesize_stacks(&config, StackSelection::Main, &source)
            .await
            .unwrap();
        let rows = resource_rows(&synthesis.stacks[0]);
        let position = |id: &str| rows.iter().position(|r| r.logical_id == id).unwrap();

        assert!(position("Infrastructure") < position("PortalNamespace"));
        assert!(position("PortalNamespace") < position("PortalDeployment"));
        assert!(position("PortalDeployment") < position("PortalService"));

        let service = &rows[position("PortalService")];
        assert_eq!(service.type_name, "Service");
        assert!(service.depends_on.contains(&"PortalDeployment".to_string()));
    }

    #[test]
    fn test_config_init() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("infrastack.yaml");
        let path_str = path.to_string_lossy().to_string();

        let written = config_init(Some(&path_str), false).unwrap();
        assert_eq!(written, path);
        assert!(matches!(
            config_init(Some(&path_str), false),
            Err(CommandError::AlreadyExists(_))
        ));
        assert!(config_init(Some(&path_str), true).is_ok());
    }
}
