//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::ContextInfo;
use crate::cluster::{ReplicaSet, Scale};

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
    push_row(&mut output, headers.iter().map(|h| h.to_uppercase()), &widths);
    for row in rows {
        push_row(&mut output, row.into_iter(), &widths);
    }
    output
}

fn push_row(output: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let line: Vec<String> = cells
        .enumerate()
        .map(|(i, cell)| match widths.get(i) {
            Some(width) => format!("{:width$}", cell, width = width),
            None => cell,
        })
        .collect();
    output.push_str(line.join("   ").trim_end());
    output.push('\n');
}

// ============================================================================
// Context display
// ============================================================================

/// Format context list for display
pub fn format_context_list(contexts: &[ContextInfo]) -> String {
    let headers = &["", "NAME", "URL", "NAMESPACE"];
    let rows: Vec<Vec<String>> = contexts
        .iter()
        .map(|ctx| {
            vec![
                if ctx.is_current { "*" } else { " " }.to_string(),
                ctx.name.clone(),
                ctx.url.clone(),
                ctx.namespace.clone(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format current context for display
pub fn format_current_context(name: &str, url: &str) -> String {
    format!("Current context: {} ({})\n", name, url)
}

// ============================================================================
// Workload display
// ============================================================================

/// One-line summary of a ReplicaSet and its scale
pub fn format_replica_set(rs: &ReplicaSet, scale: &Scale) -> String {
    let status = rs.status.clone().unwrap_or_default();
    let image = rs
        .spec
        .template
        .spec
        .containers
        .first()
        .map(|c| c.image.clone())
        .unwrap_or_default();

    format_table(
        &["NAME", "DESIRED", "CURRENT", "READY", "IMAGE"],
        vec![vec![
            rs.metadata.name.clone(),
            scale.spec.replicas.to_string(),
            status.replicas.to_string(),
            status.ready_replicas.to_string(),
            image,
        ]],
    )
}

pub fn format_scaled(name: &str, scale: &Scale) -> String {
    format!("replicaset/{} scaled to {}\n", name, scale.spec.replicas)
}

pub fn format_created(rs: &ReplicaSet) -> String {
    format!(
        "replicaset/{} created ({} replicas)\n",
        rs.metadata.name, rs.spec.replicas
    )
}

pub fn format_deleted(name: &str) -> String {
    format!("replicaset/{} deleted\n", name)
}
