//! Output formatting for process groups

use clap::ValueEnum;
use colored::Colorize;
use kind_ps_lib::ProcessGroup;
use serde::Serialize;
use tabled::settings::object::Columns;
use tabled::settings::{Modify, Style, Width};
use tabled::{Table, Tabled};

/// Columns reserved for indentation and the PID column
const CMD_COLUMN_MARGIN: usize = 16;
const DEFAULT_TERMINAL_WIDTH: usize = 100;

/// Output format for the process listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable blocks (default)
    #[default]
    Tabular,
    /// JSON array
    Json,
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "CMD")]
    cmd: String,
}

/// Width of the controlling terminal
///
/// `COLUMNS` wins when set, then the tty size, then a fixed default.
pub fn terminal_width() -> usize {
    let tty_columns = crossterm::terminal::size().ok().map(|(columns, _)| columns);
    resolve_width(std::env::var("COLUMNS").ok().as_deref(), tty_columns)
}

fn resolve_width(columns_env: Option<&str>, tty_columns: Option<u16>) -> usize {
    let usable = |w: &usize| *w > CMD_COLUMN_MARGIN * 2;
    columns_env
        .and_then(|v| v.trim().parse().ok())
        .filter(usable)
        .or_else(|| tty_columns.map(usize::from).filter(usable))
        .unwrap_or(DEFAULT_TERMINAL_WIDTH)
}

pub fn render_json<T: Serialize>(items: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(items)
}

fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_group(group: &ProcessGroup, width: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("  {}:\n", group.container.bold()));
    out.push_str(&format!("    Pod:      {}\n", group.pod.cyan()));
    out.push_str(&format!("    Node:     {}\n", group.node.cyan()));

    if group.pids.is_empty() {
        out.push_str(&format!("    Processes: {}\n", "none".yellow()));
    } else {
        let rows = group.pids.iter().map(|p| ProcessRow {
            pid: p.pid.clone(),
            cmd: p.cmd.clone(),
        });
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(
                Modify::new(Columns::single(1))
                    .with(Width::wrap(width.saturating_sub(CMD_COLUMN_MARGIN)).keep_words()),
            )
            .to_string();
        out.push_str("    Processes:\n");
        out.push_str(&indent(&table, 4));
        out.push('\n');
    }

    out.push_str(&format!("    Image:    {}\n", group.image));
    out.push_str(&format!("    Created:  {}\n", group.created));
    out.push_str("    Labels:");
    for (key, value) in &group.labels {
        out.push_str(&format!("\n      {}: {}", key, value));
    }
    out
}

/// Human readable listing with a summary footer
pub fn render_tabular(groups: &[ProcessGroup], width: usize) -> String {
    if groups.is_empty() {
        return "No processes found".yellow().to_string();
    }

    let blocks: Vec<String> = groups.iter().map(|g| render_group(g, width)).collect();
    let processes: usize = groups.iter().map(|g| g.pids.len()).sum();

    format!(
        "{}\n{}\n\n{}\n  Containers: {}\n  Processes:  {}",
        "Containers:".bold(),
        blocks.join("\n\n"),
        "Summary:".bold(),
        groups.len(),
        processes
    )
}

pub fn print_groups(groups: &[ProcessGroup], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", render_json(&groups)?),
        OutputFormat::Tabular => println!("{}", render_tabular(groups, terminal_width())),
    }
    Ok(())
}
