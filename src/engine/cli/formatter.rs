//! CLI Output Formatting Module
//! Colorized terminal output for backup, restore and audit listings

use colored::Colorize;

use crate::engine::audit::AuditAction;
use crate::engine::snapshot::BackupKind;

pub struct CliFormatter;

impl CliFormatter {
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print a table header, padding each column to `widths`
    pub fn table_header(columns: &[&str], widths: &[usize]) {
        let header = pad_row(columns, widths);
        println!("  {}", header.bright_white().bold());
        println!("  {}", "─".repeat(header.chars().count()).bright_black());
    }

    pub fn table_row(values: &[&str], widths: &[usize]) {
        println!("  {}", pad_row(values, widths));
    }
}

fn pad_row(values: &[&str], widths: &[usize]) -> String {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("{:<width$}", v, width = widths.get(i).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join(" │ ")
}

/// Colored label for a backup kind
pub fn kind_label(kind: BackupKind) -> String {
    match kind {
        BackupKind::Manual => "manual".bright_magenta().to_string(),
        BackupKind::Automatic => "auto".bright_blue().to_string(),
    }
}

/// Colored label for an audit action; destructive actions stand out
pub fn action_label(action: AuditAction) -> String {
    let text = action.as_str();
    match action {
        AuditAction::Create | AuditAction::Restore => text.green().to_string(),
        AuditAction::Update => text.yellow().to_string(),
        AuditAction::SoftDelete => text.bright_red().to_string(),
        AuditAction::Delete | AuditAction::ForceDelete => text.red().bold().to_string(),
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format a duration given in milliseconds
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let seconds = ms / 1_000;
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1_500), "1.5s");
        assert_eq!(format_duration_ms(90_000), "1m 30s");
    }

    #[test]
    fn test_pad_row() {
        assert_eq!(pad_row(&["a", "bb"], &[3, 2]), "a   │ bb");
    }
}
