//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use std::collections::BTreeMap;

use super::commands::ResourceRow;
use crate::assembly::Assembly;
use crate::config::ValidationResult;
use crate::registry::RepositoryUri;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Stack display
// ============================================================================

/// Resources of one stack, apply order preserved
pub fn format_resource_list(stack: &str, rows: &[ResourceRow]) -> String {
    let table_rows = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let depends = if row.depends_on.is_empty() {
                "-".to_string()
            } else {
                row.depends_on.join(",")
            };
            vec![
                (i + 1).to_string(),
                row.logical_id.clone(),
                row.type_name.clone(),
                depends,
            ]
        })
        .collect();

    format!(
        "{}:\n{}",
        stack,
        format_table(&["#", "logical id", "type", "depends on"], table_rows)
    )
}

/// Summary printed after `synth`
pub fn format_assembly_summary(assembly: &Assembly) -> String {
    let mut output = format!("Synthesized to {}\n", assembly.directory.display());

    for (name, artifact) in &assembly.manifest.artifacts {
        output.push_str(&format!("\n  {} ({})\n", name, artifact.environment));
        output.push_str(&format!("    template:  {}\n", artifact.template_file));
        if let Some(bundle) = &artifact.manifest_bundle {
            output.push_str(&format!("    manifests: {}\n", bundle));
        }
        for (output_name, value) in &artifact.outputs {
            output.push_str(&format!("    output {} = {}\n", output_name, value));
        }
    }

    output
}

pub fn format_registry(name: &str, uri: &RepositoryUri) -> String {
    format!("{}\t{}\n", name, uri)
}

/// Summary line for `validate`
pub fn format_validation_summary(report: &BTreeMap<String, ValidationResult>) -> String {
    let count = |pred: fn(&ValidationResult) -> bool| report.values().filter(|r| pred(*r)).count();
    let errors = count(ValidationResult::has_errors);
    let warnings = count(ValidationResult::has_warnings);

    if errors == 0 && warnings == 0 {
        "✓ No problems found\n".to_string()
    } else if errors == 0 {
        format!("✓ Valid with warnings on {} subject(s)\n", warnings)
    } else {
        format!("✗ Errors on {} subject(s)\n", errors)
    }
}
