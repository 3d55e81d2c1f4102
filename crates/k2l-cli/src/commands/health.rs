//! Health command implementation.

use super::status::format_number;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response served by `k2l sync --watch`.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    components: BTreeMap<String, ComponentStatus>,
    #[serde(default)]
    sync_running: bool,
    last_success: Option<String>,
    #[serde(default)]
    consecutive_failures: u32,
}

#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    reason: Option<String>,
}

/// Query a running sync process.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    let response = match client.get(&health_url).send().await {
        Ok(response) => response,
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs a k2l watch process running?");
            println!("Start it with: k2l sync --watch --config <path-to-config>");
            bail!("health endpoint unreachable");
        }
    };

    let status_code = response.status();
    let health: HealthResponse = response
        .json()
        .await
        .with_context(|| format!("Failed to parse health response (HTTP {})", status_code))?;
    print_health_status(&health, status_code.as_u16());

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));
    println!("\n--- Metrics ---");
    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => println!("Failed to fetch metrics from {}: {}", metrics_url, e),
    }

    if health.status == "unhealthy" {
        bail!("sync process reports unhealthy");
    }
    Ok(())
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    println!(
        "Sync running: {}, last success: {}, consecutive failures: {}",
        health.sync_running,
        health.last_success.as_deref().unwrap_or("never"),
        health.consecutive_failures
    );
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let tag = status_tag(&status.status);
            match &status.reason {
                Some(reason) => println!("  {} {}: {} ({})", tag, name, status.status, reason),
                None => println!("  {} {}: {}", tag, name, status.status),
            }
        }
    }
}

/// Unlabeled samples from Prometheus text output.
fn parse_samples(metrics_text: &str) -> HashMap<&str, f64> {
    metrics_text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let value = parts.next()?.parse::<f64>().ok()?;
            Some((name, value))
        })
        .collect()
}

fn print_metrics(metrics_text: &str) {
    let values = parse_samples(metrics_text);

    let rows = [
        ("k2l_syncs_total", "Syncs:"),
        ("k2l_records_committed_total", "Records Committed:"),
        ("k2l_batches_committed_total", "Batches Committed:"),
        ("k2l_lake_next_offset", "Lake Next Offset:"),
        ("k2l_source_lag", "Source Lag:"),
    ];

    let mut printed = false;
    for (metric, label) in rows {
        if let Some(v) = values.get(metric) {
            println!("{:<20} {}", label, format_number(*v as u64));
            printed = true;
        }
    }

    if !printed {
        println!("No metrics available yet.");
    }
}
