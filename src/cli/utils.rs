//! Shared utility functions for CLI commands

use crate::backup::{MetadataRecord, PlanStatus};
use crate::cli::error::CliError;
use colored::*;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

/// Display a user-friendly error message with suggestions
pub fn display_error_with_suggestions(error: &CliError, context: &str) {
    eprintln!(
        "{} {} [{}]",
        "❌ Error:".red().bold(),
        context,
        error.kind()
    );
    eprintln!("   {}", error.user_friendly_message().red());

    let error_str = error.to_string().to_lowercase();
    if error_str.contains("no recipient key") {
        eprintln!("{}", "💡 Suggestions:".blue());
        eprintln!("   • Export BRK_RECIPIENT_KEY (64 hex chars or base64 of 32 bytes)");
        eprintln!("   • Or point BRK_RECIPIENT_KEY_FILE / encryption.key_file at a key file");
    } else if error_str.contains("permission denied") {
        eprintln!("{}", "💡 Suggestions:".blue());
        eprintln!("   • Check permissions on the store and lock directories");
        eprintln!("   • Run as the user that owns the backup store");
    } else if error_str.contains("no producer configured") {
        eprintln!("{}", "💡 Suggestions:".blue());
        eprintln!("   • Add a [sources.<type>] section to brk.toml");
    } else if error_str.contains("no restore target") {
        eprintln!("{}", "💡 Suggestions:".blue());
        eprintln!("   • Add a [targets.<type>] section to brk.toml");
    }
}

/// Truncate text with ellipsis if it exceeds max length
pub fn truncate_with_ellipsis(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_length.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format bytes with optional human-readable output
pub fn format_bytes(bytes: u64, human_readable: bool) -> String {
    if !human_readable {
        return bytes.to_string();
    }

    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format timestamp as "X time ago"
pub fn format_time_ago(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let duration = now.signed_duration_since(timestamp);

    if duration.num_days() > 0 {
        format!("{} days ago", duration.num_days())
    } else if duration.num_hours() > 0 {
        format!("{} hours ago", duration.num_hours())
    } else if duration.num_minutes() > 0 {
        format!("{} minutes ago", duration.num_minutes())
    } else {
        "just now".to_string()
    }
}

/// Render artifact records as a table
pub fn backups_table(records: &[MetadataRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "ID", "Type", "Created", "Size", "Encrypted", "Retain until", "Revision",
        ]);
    for record in records {
        table.add_row(vec![
            record.backup_name.to_string(),
            record.backup_type.to_string(),
            format_time_ago(record.timestamp),
            format_bytes(record.size_bytes, true),
            if record.encrypted { "yes" } else { "no" }.to_string(),
            record.retention_until.format("%Y-%m-%d %H:%M").to_string(),
            truncate_with_ellipsis(&record.source_revision, 12),
        ]);
    }
    table
}

/// Colored label for a plan status
pub fn plan_status_label(status: &PlanStatus) -> ColoredString {
    match status {
        PlanStatus::Verified => "verified".green(),
        PlanStatus::Expired => "expired".yellow(),
        PlanStatus::Failed(_) => "FAILED".red().bold(),
        PlanStatus::Missing => "missing".red(),
    }
}
