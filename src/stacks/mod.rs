//! Stack assemblers
//!
//! Each assembler turns settings into a declared graph and renders it. The
//! base stack owns the registry; the main stack needs the registry's URI and
//! therefore takes a resolved [`RepositoryUri`](crate::registry::RepositoryUri).

pub mod base;
pub mod main;

use thiserror::Error;

use crate::cloud::DeclarationError;
use crate::graph::{GraphError, GraphNode, StackGraph};
use crate::k8s::{self, Manifest};
use crate::template::{Output, Template, TemplateError};

pub const BASE_STACK: &str = "InfrastructureBaseStack";
pub const MAIN_STACK: &str = "InfrastructureStack";

/// Errors raised while assembling a stack
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Which stacks a command operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StackSelection {
    Base,
    Main,
    All,
}

impl StackSelection {
    pub fn includes_base(&self) -> bool {
        matches!(self, StackSelection::Base | StackSelection::All)
    }

    pub fn includes_main(&self) -> bool {
        matches!(self, StackSelection::Main | StackSelection::All)
    }
}

/// A fully declared and rendered stack
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub name: String,
    /// `aws://<account>/<region>`
    pub environment: String,
    pub graph: StackGraph,
    pub template: Template,
}

impl SynthesizedStack {
    /// Cluster manifests in apply order
    pub fn manifests(&self) -> Vec<&Manifest> {
        self.graph
            .manifests_in_order()
            .into_iter()
            .filter_map(GraphNode::manifest)
            .collect()
    }

    /// The manifests as one multi-document YAML stream
    pub fn manifest_bundle(&self) -> Result<String, TemplateError> {
        Ok(k8s::to_yaml_stream(&self.manifests())?)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.template.outputs.get(name)
    }
}
