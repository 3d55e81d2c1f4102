//! Status command implementation.

use anyhow::{Context, Result};
use k2l_core::lake::{FileLake, LakeSummary, RecoveryReport};
use std::path::Path;

/// Print a summary of the lake at `path`.
///
/// Opening the lake runs recovery, so this should not be pointed at a lake
/// another process is writing to.
pub fn run(path: &Path, json: bool) -> Result<()> {
    let lake = FileLake::open_path(path)
        .with_context(|| format!("Failed to open lake at {}", path.display()))?;
    let summary = lake.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(&summary, lake.recovery()));
    }

    Ok(())
}

fn render_summary(summary: &LakeSummary, recovery: &RecoveryReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("Lake: {}\n", summary.path.display()));
    out.push_str(&format!("  Commits:           {}\n", summary.commits));
    out.push_str(&format!(
        "  Records:           {}\n",
        format_number(summary.records)
    ));
    out.push_str(&format!("  Next offset:       {}\n", summary.next_offset));
    match summary.last_input_offset {
        Some(offset) => out.push_str(&format!("  Last input offset: {}\n", offset)),
        None => out.push_str("  Last input offset: -\n"),
    }
    out.push_str(&format!(
        "  Size:              {:.2} MB\n",
        summary.size_bytes as f64 / 1024.0 / 1024.0
    ));
    if let Some(at) = summary.last_commit_at {
        out.push_str(&format!("  Last commit:       {}\n", at.to_rfc3339()));
    }

    if recovery.repaired() {
        out.push_str("\n[WARN] Repaired on open:\n");
        if recovery.truncated_bytes > 0 {
            out.push_str(&format!(
                "  Truncated {} bytes of torn journal tail\n",
                recovery.truncated_bytes
            ));
        }
        for orphan in &recovery.orphans_removed {
            out.push_str(&format!("  Removed orphan segment {}\n", orphan));
        }
    }

    out
}

pub(crate) fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
