//! Cloud resource descriptions and their template expansion

pub mod ecr;
pub mod eks;
pub mod iam;
pub mod network;

pub use ecr::{LifecycleRule, Repository};
pub use eks::{
    AmiType, AwsAuth, CapacityType, Cluster, DeclaredCluster, NodeGroup, ScalingConfig,
    SizingError,
};
pub use iam::Role;
pub use network::{Vpc, VpcRefs};

use thiserror::Error;

use crate::graph::GraphError;

/// Errors raised while declaring cloud resources
#[derive(Error, Debug)]
pub enum DeclarationError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid node group sizing: {0}")]
    Sizing(#[from] SizingError),

    #[error("Retention policy must keep at least one image")]
    EmptyRetention,

    #[error("Invalid CIDR block '{0}'")]
    InvalidCidr(String),

    #[error("Cannot fit {subnets} subnets into {cidr}")]
    AddressSpaceExhausted { cidr: String, subnets: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DeclarationError {
    fn from(e: serde_json::Error) -> Self {
        DeclarationError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for DeclarationError {
    fn from(e: serde_yaml::Error) -> Self {
        DeclarationError::Serialization(e.to_string())
    }
}
