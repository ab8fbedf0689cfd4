//! Shared styling utilities for CLI output.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Label for the local side of a conflict (cyan).
pub fn local_label() -> String {
    Style::new().cyan().bold().apply_to("local").to_string()
}

/// Label for the remote side of a conflict (magenta).
pub fn remote_label() -> String {
    Style::new().magenta().bold().apply_to("remote").to_string()
}

/// Human-readable 1-based, inclusive line span for a half-open 0-based range.
/// Empty ranges render as the insertion point.
pub fn line_span(start: usize, end: usize) -> String {
    match end.saturating_sub(start) {
        0 => format!("before {}", start + 1),
        1 => format!("{}", start + 1),
        _ => format!("{}-{}", start + 1, end),
    }
}
