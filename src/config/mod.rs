//! Deployment settings
//!
//! Everything the two stacks hard-wire (account, region, registry name,
//! cluster version, node sizing, image tags) lives in one YAML document.
//! Built-in defaults reproduce the reference deployment exactly, so the
//! file is optional.

pub mod validation;

pub use validation::{
    validate_config, validate_graph, ValidationMessage, ValidationResult, ValidationSeverity,
};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cloud::{AmiType, CapacityType, NodeGroup, ScalingConfig};

/// Config file picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "infrastack.yaml";

pub const DEFAULT_ACCOUNT: &str = "AccountId";
pub const DEFAULT_REGION: &str = "eu-north-1";
pub const DEFAULT_REPOSITORY: &str = "infrastructure-ecr";
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.31";

/// Per-user config location: ~/.config/infrastack/config.yaml
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("infrastack")
        .join("config.yaml")
}

/// Errors that can occur while loading or saving settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Registry owned by the base stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    /// Images kept by the lifecycle rule
    #[serde(default = "default_max_image_count")]
    pub max_image_count: u32,
}

fn default_max_image_count() -> u32 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_REPOSITORY.to_string(),
            max_image_count: default_max_image_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_cidr")]
    pub cidr: String,
    #[serde(default = "default_max_azs")]
    pub max_azs: usize,
}

fn default_cidr() -> String {
    crate::cloud::network::DEFAULT_CIDR.to_string()
}

fn default_max_azs() -> usize {
    3
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: default_cidr(),
            max_azs: default_max_azs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Physical cluster name; generated by the provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub version: String,

    #[serde(default)]
    pub default_capacity: u32,

    /// IAM user granted cluster admin
    pub admin_user: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: None,
            version: DEFAULT_KUBERNETES_VERSION.to_string(),
            default_capacity: 0,
            admin_user: "cli-user".to_string(),
        }
    }
}

/// Image tags pulled from the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTags {
    pub portal: String,
    pub dataplatform: String,
}

impl Default for ImageTags {
    fn default() -> Self {
        Self {
            portal: "portal-ui-v1".to_string(),
            dataplatform: "dataplatform-genai-v1".to_string(),
        }
    }
}

fn default_gpu_node_group() -> NodeGroup {
    NodeGroup {
        name: "gpu-nodes".to_string(),
        instance_types: vec!["g4dn.xlarge".to_string()],
        scaling: ScalingConfig::GPU_DEFAULT,
        ami_type: AmiType::Al2X86_64Gpu,
        capacity_type: CapacityType::OnDemand,
        disk_size: 250,
    }
}

/// The complete settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    pub account: String,
    pub region: String,

    /// Named credentials profile used for the registry lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default = "default_gpu_node_group")]
    pub gpu_node_group: NodeGroup,

    #[serde(default)]
    pub images: ImageTags,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            region: DEFAULT_REGION.to_string(),
            profile: None,
            registry: RegistryConfig::default(),
            network: NetworkConfig::default(),
            cluster: ClusterConfig::default(),
            gpu_node_group: default_gpu_node_group(),
            images: ImageTags::default(),
        }
    }
}

impl InfraConfig {
    /// Target environment as `aws://<account>/<region>`
    pub fn environment(&self) -> String {
        format!("aws://{}/{}", self.account, self.region)
    }

    pub fn admin_user_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:user/{}",
            self.account, self.cluster.admin_user
        )
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, account: Option<String>, region: Option<String>) -> Self {
        if let Some(account) = account {
            self.account = account;
        }
        if let Some(region) = region {
            self.region = region;
        }
        self
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<InfraConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Serialize config to YAML string
pub fn serialize_config(config: &InfraConfig) -> Result<String, ConfigError> {
    serde_yaml::to_string(config).map_err(|e| ConfigError::WriteError(e.to_string()))
}

/// Expand `~` in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load settings from `explicit` if given, otherwise the first file found
/// among `./infrastack.yaml` and the per-user config, otherwise defaults
pub fn load_config(explicit: Option<&str>) -> Result<InfraConfig, ConfigError> {
    if let Some(path) = explicit {
        let path = expand_path(path);
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path));
        }
        return load_config_from(&path);
    }

    for candidate in [PathBuf::from(LOCAL_CONFIG_FILE), user_config_path()] {
        if candidate.exists() {
            return load_config_from(&candidate);
        }
    }

    debug!("No config file found, using built-in defaults");
    Ok(InfraConfig::default())
}

/// Load config from a specific path; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<InfraConfig, ConfigError> {
    if !path.exists() {
        return Ok(InfraConfig::default());
    }
    debug!("Loading config from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Save config to a specific path
pub fn save_config_to(config: &InfraConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serialize_config(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
