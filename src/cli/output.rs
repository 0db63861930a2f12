//! Output formatting shared by the CLI commands

use anyhow::{Context, Result};
use serde::Serialize;

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Format name/value pairs as an aligned two-column block.
pub fn format_fields(fields: &[(&str, String)]) -> String {
    let width = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    fields
        .iter()
        .map(|(name, value)| format!("{:<width$}  {}", name, value, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print name/value pairs as an aligned two-column block.
pub fn print_fields(fields: &[(&str, String)]) {
    println!("{}", format_fields(fields));
}
