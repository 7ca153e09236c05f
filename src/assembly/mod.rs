//! Cloud assembly: the files a deployment tool consumes
//!
//! Layout of an output directory:
//!
//! ```text
//! <out>/manifest.json
//! <out>/<Stack>.template.json      (or .yaml)
//! <out>/<Stack>.manifests.yaml     (only for stacks with cluster manifests)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::stacks::SynthesizedStack;
use crate::template::{content_hash, TemplateError, TemplateFormat};

pub const ASSEMBLY_VERSION: &str = "1.0.0";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Errors raised while writing an assembly
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Render error: {0}")]
    Render(#[from] TemplateError),

    #[error("Failed to write assembly manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("No stacks to write")]
    Empty,

    #[error("Stack '{0}' appears more than once")]
    DuplicateStack(String),
}

/// One stack's entry in `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEntry {
    pub environment: String,
    pub template_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_bundle: Option<String>,
    /// Hex sha256 of the template file contents
    pub template_hash: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

/// `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

/// What was written
#[derive(Debug, Clone)]
pub struct Assembly {
    pub directory: PathBuf,
    pub manifest: AssemblyManifest,
}

impl Assembly {
    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE)
    }
}

// ============================================================================
// SBIO: Pure rendering (no I/O)
// ============================================================================

/// A rendered file waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFile {
    pub name: String,
    pub contents: String,
}

/// Render one stack's files and its manifest entry
pub fn render_stack(
    stack: &SynthesizedStack,
    format: TemplateFormat,
) -> Result<(Vec<RenderedFile>, ArtifactEntry), AssemblyError> {
    let template_file = format!("{}.template.{}", stack.name, format.extension());
    let template = stack.template.render(format)?;
    let template_hash = content_hash(&template);

    let mut files = vec![RenderedFile {
        name: template_file.clone(),
        contents: template,
    }];

    let manifest_bundle = if stack.manifests().is_empty() {
        None
    } else {
        let name = format!("{}.manifests.yaml", stack.name);
        files.push(RenderedFile {
            name: name.clone(),
            contents: stack.manifest_bundle()?,
        });
        Some(name)
    };

    let outputs = stack
        .template
        .outputs
        .iter()
        .map(|(name, output)| (name.clone(), output.value.clone()))
        .collect();

    let entry = ArtifactEntry {
        environment: stack.environment.clone(),
        template_file,
        manifest_bundle,
        template_hash,
        outputs,
    };
    Ok((files, entry))
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Write every stack plus `manifest.json` under `out_dir`
pub fn write_assembly(
    stacks: &[SynthesizedStack],
    out_dir: &Path,
    format: TemplateFormat,
) -> Result<Assembly, AssemblyError> {
    if stacks.is_empty() {
        return Err(AssemblyError::Empty);
    }

    // Nothing touches the directory until every stack has rendered
    let mut files = Vec::new();
    let mut artifacts = BTreeMap::new();
    for stack in stacks {
        if artifacts.contains_key(&stack.name) {
            return Err(AssemblyError::DuplicateStack(stack.name.clone()));
        }
        let (stack_files, entry) = render_stack(stack, format)?;
        files.extend(stack_files);
        artifacts.insert(stack.name.clone(), entry);
    }

    let manifest = AssemblyManifest {
        version: ASSEMBLY_VERSION.to_string(),
        created_at: Utc::now(),
        artifacts,
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)?;

    std::fs::create_dir_all(out_dir)?;
    for file in files {
        let path = out_dir.join(&file.name);
        debug!("Writing {}", path.display());
        std::fs::write(&path, file.contents)?;
    }
    std::fs::write(out_dir.join(MANIFEST_FILE), manifest_json)?;

    info!(
        "Wrote {} stack(s) to {}",
        manifest.artifacts.len(),
        out_dir.display()
    );

    Ok(Assembly {
        directory: out_dir.to_path_buf(),
        manifest,
    })
}

/// Read back `manifest.json` from an assembly directory
pub fn read_manifest(out_dir: &Path) -> Result<AssemblyManifest, AssemblyError> {
    let content = std::fs::read_to_string(out_dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&content)?)
}
