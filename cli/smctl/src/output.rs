//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// Print a list: table rows, or the raw items as JSON.
pub fn print_list<T: Serialize, R: Tabled>(items: &[T], format: OutputFormat, row: fn(&T) -> R) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                let rows: Vec<R> = items.iter().map(row).collect();
                println!("{}", Table::new(rows));
            }
        }
        OutputFormat::Json => println!("{}", format_json(items, "[]")),
    }
}

/// Print a single item as pretty JSON.
pub fn print_single<T: Serialize>(data: &T) {
    println!("{}", format_json(data, "{}"));
}

pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

fn format_json<T: Serialize + ?Sized>(data: &T, fallback: &str) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| fallback.to_string())
}

/// Comma-joined display of a list, `-` when empty.
pub fn join_or_dash<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    let joined = values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}
