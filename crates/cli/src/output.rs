//! Output formatting utilities
//!
//! Tables and JSON go to stdout. Status messages go to stderr so they never
//! mix with a table that is being redirected.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Render items as a rounded table. Cells may carry color codes.
pub fn render_rows<T: Tabled>(items: &[T]) -> String {
    Table::new(items).with(Style::rounded()).to_string()
}

/// Print a table from a list of items, or `empty` as a warning when there are none
pub fn print_table<T: Tabled>(items: &[T], empty: &str) {
    if items.is_empty() {
        print_warning(empty);
        return;
    }
    println!("{}", render_rows(items));
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// An error and its sources joined into one line
pub fn describe_error(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes >= GB {
        format!("{:.2}Gi", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes / KB)
    } else {
        format!("{:.0}B", bytes)
    }
}

/// Format millicores as human-readable string
pub fn format_cpu(millicores: f64) -> String {
    if millicores >= 1000.0 {
        format!("{:.1}", millicores / 1000.0)
    } else {
        format!("{:.0}m", millicores)
    }
}

/// Color a percentage of limit by how close it is to the limit
pub fn color_percent(percent: f64) -> String {
    let formatted = format!("{:.2}%", percent);
    if percent >= 90.0 {
        formatted.red().to_string()
    } else if percent >= 70.0 {
        formatted.yellow().to_string()
    } else {
        formatted
    }
}
