//! Output formatting utilities
//!
//! JSON on stdout is what the optimizer consumes; the table format is for
//! operators running the driver by hand.

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use driver_lib::cycle::{ComponentStatus, CycleReport};
use driver_lib::translator::SettingReport;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

/// Output format for driver commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Table format
    Table,
}

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Setting")]
    setting: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Range")]
    range: String,
    #[tabled(rename = "Pinned")]
    pinned: String,
}

#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Deployment")]
    workload: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Changes")]
    changes: usize,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the result of `describe`
pub fn print_description(report: &CycleReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&report.description()),
        OutputFormat::Table => {
            print_header(report);
            print_settings(report);
            print_failures(report);
            Ok(())
        }
    }
}

/// Print the result of `adjust`
pub fn print_adjustment(report: &CycleReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            print_header(report);
            if !report.enabled {
                print_warning("Adjustments disabled for this cycle");
            } else if report.dry_run {
                print_info("Dry run: patches computed but not sent");
            }

            let rows: Vec<WorkloadRow> = report
                .workloads
                .iter()
                .map(|(name, w)| WorkloadRow {
                    workload: name.clone(),
                    outcome: color_status(w.outcome.as_str()),
                    changes: w.changes,
                })
                .collect();
            if !rows.is_empty() {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }

            print_settings(report);
            print_failures(report);
            if report.is_success() {
                print_success("Cycle completed");
            }
            Ok(())
        }
    }
}

fn print_header(report: &CycleReport) {
    println!(
        "{} {} in namespace {}",
        "Cycle:".bold(),
        report.operation,
        report.namespace.cyan()
    );
    for name in report.components_with(ComponentStatus::Excluded) {
        print_info(&format!("{} excluded by label", name));
    }
}

fn print_settings(report: &CycleReport) {
    let rows: Vec<SettingRow> = report
        .components
        .iter()
        .flat_map(|(component, c)| {
            c.settings.iter().map(move |(setting, s)| SettingRow {
                component: component.clone(),
                setting: setting.clone(),
                value: format_value(&s.value, s.unit.as_deref()),
                range: format_range(s),
                pinned: if s.pinned { "yes".yellow().to_string() } else { String::new() },
            })
        })
        .collect();

    if rows.is_empty() {
        print_warning("No settings reported");
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn print_failures(report: &CycleReport) {
    for failure in &report.failures {
        print_error(&format!("[{}] {}", failure.kind, failure.message));
    }
}

fn format_value(value: &Value, unit: Option<&str>) -> String {
    let rendered = match value {
        Value::Null => return "-".dimmed().to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match unit {
        Some(unit) => format!("{}{}", rendered, unit),
        None => rendered,
    }
}

fn format_range(setting: &SettingReport) -> String {
    match (&setting.values, setting.min, setting.max, setting.step) {
        (Some(values), ..) => values.join(" | "),
        (None, Some(min), Some(max), Some(step)) => format!("{}..{} step {}", min, max, step),
        _ => String::new(),
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status {
        "applied" | "ok" => status.green().to_string(),
        "unchanged" | "skipped" => status.normal().to_string(),
        "dry_run" => status.blue().to_string(),
        "disabled" | "excluded" => status.yellow().to_string(),
        "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}
