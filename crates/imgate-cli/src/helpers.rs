//! Shared CLI helpers — path expansion, banner, check rendering.

use std::path::PathBuf;

use colored::{ColoredString, Colorize};

use imgate_core::{CheckLevel, Verdict};

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Print the banner shown at gateway start.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "{}  v{}",
        "📡 imgate".cyan().bold(),
        version.dimmed()
    );
}

/// Fixed-width marker for one diagnostic level.
pub fn level_marker(level: CheckLevel) -> ColoredString {
    match level {
        CheckLevel::Pass => "✓ pass".green(),
        CheckLevel::Warn => "! warn".yellow(),
        CheckLevel::Fail => "✗ fail".red(),
        CheckLevel::Info => "i info".blue(),
    }
}

pub fn verdict_label(verdict: Verdict) -> ColoredString {
    match verdict {
        Verdict::Pass => "PASS".green().bold(),
        Verdict::Warn => "WARN".yellow().bold(),
        Verdict::Fail => "FAIL".red().bold(),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
