//! Formatting utilities for Telegram HTML messages.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn pre(text: &str) -> String {
    format!("<pre>{}</pre>", escape_html(text))
}

pub fn truncate_one_line(text: &str, max_len: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    format!("{}...", cleaned.chars().take(max_len).collect::<String>())
}

/// Short human duration: `850ms`, `42s`, `3m 07s`, `1h 02m`.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    if secs < 3600 {
        return format!("{}m {:02}s", secs / 60, secs % 60);
    }
    format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
}

/// Time left until `end`, or `None` once it has passed.
pub fn format_remaining(end: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
    let left = (end - now).to_std().ok()?;
    if left.is_zero() {
        return None;
    }
    Some(format_duration(Duration::from_secs(left.as_secs())))
}

/// Box-drawn table laying `items` out over at most `columns` columns.
pub fn grid_table(columns: usize, items: &[String]) -> String {
    if items.is_empty() || columns == 0 {
        return String::new();
    }
    let columns = columns.min(items.len());
    let mut widths = vec![0usize; columns];
    for (i, item) in items.iter().enumerate() {
        let w = &mut widths[i % columns];
        *w = (*w).max(item.chars().count());
    }

    let border = |begin: &str, sep: &str, end: &str| {
        let mid: Vec<String> = widths.iter().map(|w| "═".repeat(w + 2)).collect();
        format!("{begin}{}{end}", mid.join(sep))
    };

    let mut lines = vec![border("╔", "╦", "╗")];
    for row in items.chunks(columns) {
        let cells: Vec<String> = (0..columns)
            .map(|i| {
                let value = row.get(i).map(String::as_str).unwrap_or("");
                let pad = widths[i] - value.chars().count();
                format!("{value}{}", " ".repeat(pad))
            })
            .collect();
        lines.push(format!("║ {} ║", cells.join(" ║ ")));
    }
    lines.push(border("╚", "╩", "╝"));
    lines.join("\n")
}
