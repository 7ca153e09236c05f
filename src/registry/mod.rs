//! Container registry lookup
//!
//! The main stack pins its images to the URI of a registry created by the
//! base stack. That URI only exists in the provider account, so it is looked
//! up once before synthesis. A missing registry is fatal: without a
//! [`RepositoryUri`] the main stack cannot be assembled at all.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors raised while resolving a registry
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("ECR repository '{name}' not found in account {account}")]
    NotFound { name: String, account: String },

    #[error("Repository catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Repository query failed: {0}")]
    Query(String),

    #[error("Failed to parse repository listing: {0}")]
    Parse(String),
}

/// One entry of a `describe-repositories` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescription {
    pub repository_name: String,
    pub repository_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
}

impl RepositoryDescription {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            repository_name: name.into(),
            repository_uri: uri.into(),
            repository_arn: None,
            registry_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeRepositoriesResponse {
    #[serde(default)]
    repositories: Vec<RepositoryDescription>,
}

/// Parse the JSON body of a `describe-repositories` response
pub fn parse_listing(body: &str) -> Result<Vec<RepositoryDescription>, ResolveError> {
    let response: DescribeRepositoriesResponse =
        serde_json::from_str(body).map_err(|e| ResolveError::Parse(e.to_string()))?;
    Ok(response.repositories)
}

/// Resolved URI of a container registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryUri(String);

impl RepositoryUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image reference `<uri>:<tag>`
    pub fn image(&self, tag: &str) -> String {
        format!("{}:{}", self.0, tag)
    }

    /// Whether `image` is pulled from this registry
    pub fn contains_image(&self, image: &str) -> bool {
        image
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('@'))
    }
}

impl fmt::Display for RepositoryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows offline catalogs in tests)
// ============================================================================

#[async_trait]
pub trait RepositoryCatalog: Send + Sync {
    /// Every repository visible to the caller
    async fn describe_repositories(&self) -> Result<Vec<RepositoryDescription>, ResolveError>;
}

/// Find `name` in the catalog; the first exact match wins
pub async fn resolve_repository_uri(
    catalog: &dyn RepositoryCatalog,
    name: &str,
    account: &str,
) -> Result<RepositoryUri, ResolveError> {
    let repositories = catalog.describe_repositories().await?;
    debug!("Catalog returned {} repositories", repositories.len());

    let uri = find_repository(&repositories, name)
        .map(|r| RepositoryUri::new(r.repository_uri.clone()))
        .ok_or_else(|| ResolveError::NotFound {
            name: name.to_string(),
            account: account.to_string(),
        })?;

    info!("ECR Repository URI: {}", uri);
    Ok(uri)
}

/// Exact-name lookup over a listing
pub fn find_repository<'a>(
    repositories: &'a [RepositoryDescription],
    name: &str,
) -> Option<&'a RepositoryDescription> {
    repositories.iter().find(|r| r.repository_name == name)
}

// ============================================================================
// SBIO: I/O implementations
// ============================================================================

/// Lists repositories through the AWS command line client
#[derive(Debug, Clone)]
pub struct AwsCliCatalog {
    pub region: String,
    pub profile: Option<String>,
    pub program: String,
}

impl AwsCliCatalog {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
            program: "aws".to_string(),
        }
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }
}

/// Arguments for `aws ecr describe-repositories`; the client pages by itself
pub fn describe_repositories_args(region: &str, profile: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "ecr".to_string(),
        "describe-repositories".to_string(),
        "--region".to_string(),
        region.to_string(),
        "--output".to_string(),
        "json".to_string(),
    ];
    if let Some(profile) = profile {
        args.push("--profile".to_string());
        args.push(profile.to_string());
    }
    args
}

#[async_trait]
impl RepositoryCatalog for AwsCliCatalog {
    async fn describe_repositories(&self) -> Result<Vec<RepositoryDescription>, ResolveError> {
        let args = describe_repositories_args(&self.region, self.profile.as_deref());
        debug!("{} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                ResolveError::CatalogUnavailable(format!("Failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Query(stderr.trim().to_string()));
        }

        parse_listing(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Reads a saved `describe-repositories` response
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RepositoryCatalog for FileCatalog {
    async fn describe_repositories(&self) -> Result<Vec<RepositoryDescription>, ResolveError> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ResolveError::CatalogUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        parse_listing(&body)
    }
}

/// Fixed in-memory listing
#[derive(Debug, Default)]
pub struct StaticCatalog {
    repositories: Vec<RepositoryDescription>,
    calls: AtomicUsize,
}

impl StaticCatalog {
    pub fn new(repositories: Vec<RepositoryDescription>) -> Self {
        Self {
            repositories,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of listings served
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryCatalog for StaticCatalog {
    async fn describe_repositories(&self) -> Result<Vec<RepositoryDescription>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.repositories.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const URI: &str = "123456789012.dkr.ecr.eu-north-1.amazonaws.com/infrastructure-ecr";

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            RepositoryDescription::new("other", "123.dkr.ecr.eu-north-1.amazonaws.com/other"),
            RepositoryDescription::new("infrastructure-ecr", URI),
        ])
    }

    #[tokio::test]
    async fn test_resolve_found() {
        let catalog = catalog();
        let uri = resolve_repository_uri(&catalog, "infrastructure-ecr", "123456789012")
            .await
            .unwrap();
        assert_eq!(uri.as_str(), URI);
        assert_eq!(catalog.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_not_found_is_not_retried() {
        let catalog = StaticCatalog::new(vec![RepositoryDescription::new("other", "x")]);
        let err = resolve_repository_uri(&catalog, "infrastructure-ecr", "AccountId")
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::NotFound { .. }));
        assert_eq!(
            err.to_string(),
            "ECR repository 'infrastructure-ecr' not found in account AccountId"
        );
        assert_eq!(catalog.call_count(), 1);
    }

    #[tokio::test]
    async fn test_name_must_match_exactly() {
        let catalog = StaticCatalog::new(vec![RepositoryDescription::new(
            "infrastructure-ecr-old",
            "x",
        )]);
        assert!(resolve_repository_uri(&catalog, "infrastructure-ecr", "a")
            .await
            .is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let repos = vec![
            RepositoryDescription::new("dup", "first"),
            RepositoryDescription::new("dup", "second"),
        ];
        assert_eq!(find_repository(&repos, "dup").unwrap().repository_uri, "first");
    }

    #[test]
    fn test_parse_listing() {
        let body = r#"{
            "repositories": [{
                "repositoryArn": "arn:aws:ecr:eu-north-1:123:repository/infrastructure-ecr",
                "registryId": "123",
                "repositoryName": "infrastructure-ecr",
                "repositoryUri": "123.dkr.ecr.eu-north-1.amazonaws.com/infrastructure-ecr",
                "imageTagMutability": "MUTABLE"
            }]
        }"#;
        let repos = parse_listing(body).unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].registry_id.as_deref(), Some("123"));

        assert!(parse_listing("{}").unwrap().is_empty());
        assert!(matches!(parse_listing("not json"), Err(ResolveError::Parse(_))));
    }

    #[test]
    fn test_describe_args() {
        let args = describe_repositories_args("eu-north-1", None);
        assert_eq!(
            args,
            vec!["ecr", "describe-repositories", "--region", "eu-north-1", "--output", "json"]
        );

        let args = describe_repositories_args("eu-north-1", Some("ops"));
        assert_eq!(&args[args.len() - 2..], &["--profile", "ops"]);
    }

    #[test]
    fn test_repository_uri_images() {
        let uri = RepositoryUri::new(URI);
        assert_eq!(uri.image("portal-ui-v1"), format!("{}:portal-ui-v1", URI));
        assert!(uri.contains_image(&uri.image("x")));
        assert!(!uri.contains_image("nvcr.io/nvidia/k8s-device-plugin:v0.13.0"));
        assert!(!uri.contains_image(&format!("{}-old:tag", URI)));
    }

    #[tokio::test]
    async fn test_file_catalog() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"repositories":[{{"repositoryName":"infrastructure-ecr","repositoryUri":"{}"}}]}}"#,
            URI
        )
        .unwrap();

        let catalog = FileCatalog::new(file.path());
        let uri = resolve_repository_uri(&catalog, "infrastructure-ecr", "a")
            .await
            .unwrap();
        assert_eq!(uri.as_str(), URI);
    }

    #[tokio::test]
    async fn test_file_catalog_missing_file() {
        let catalog = FileCatalog::new("/nonexistent/listing.json");
        assert!(matches!(
            catalog.describe_repositories().await,
            Err(ResolveError::CatalogUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_cli_catalog_missing_program() {
        let mut catalog = AwsCliCatalog::new("eu-north-1");
        catalog.program = "infrastack-no-such-aws-binary".to_string();
        assert!(matches!(
            catalog.describe_repositories().await,
            Err(ResolveError::CatalogUnavailable(_))
        ));
    }
}
