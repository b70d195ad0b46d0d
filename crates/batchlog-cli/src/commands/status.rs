//! Status command implementation.

use crate::server::HealthResponse;
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Show status and health.
pub async fn run(url: &str, metrics_url: Option<&str>) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the batchlog shipper running?");
            println!("Start it with: batchlog --config <path-to-config> ship");
            return Ok(());
        }
    }

    let metrics_url = metrics_endpoint(url, metrics_url);

    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

/// Metrics URL: explicit, or the health URL moved to the default metrics port.
fn metrics_endpoint(health_url: &str, metrics_url: Option<&str>) -> String {
    let base = match metrics_url {
        Some(url) => url.to_string(),
        None => health_url.replace(":8080", ":9090").replace("/health", ""),
    };
    let base = base.trim_end_matches('/');
    if base.ends_with("/metrics") {
        base.to_string()
    } else {
        format!("{}/metrics", base)
    }
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
    println!("Cache:             {}", health.cache);
    println!("Buffered Events:   {}", health.buffered_events);
    println!("Flushes In Flight: {}", health.flushes_in_flight);
    println!();

    if !health.components.is_empty() {
        let mut names: Vec<&String> = health.components.keys().collect();
        names.sort();

        println!("Components:");
        for name in names {
            let status = &health.components[name];
            if let Some(msg) = &status.message {
                println!(
                    "  {} {}: {} ({})",
                    status_tag(&status.status),
                    name,
                    status.status,
                    msg
                );
            } else {
                println!("  {} {}: {}", status_tag(&status.status), name, status.status);
            }
        }
    }
}

/// Collect unlabeled integer samples from Prometheus text.
fn parse_metrics(metrics_text: &str) -> HashMap<&str, u64> {
    let mut values = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            if let Ok(value) = parts[1].parse::<u64>() {
                values.insert(parts[0], value);
            }
        }
    }

    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_metrics(metrics_text);

    if let Some(v) = values.get("batchlog_events_added_total") {
        println!("Events Added:      {}", format_number(*v));
    }
    if let Some(v) = values.get("batchlog_events_published_total") {
        println!("Events Published:  {}", format_number(*v));
    }
    if let Some(v) = values.get("batchlog_flushes_total") {
        println!("Batch Flushes:     {}", v);
    }

    let failures: u64 = values
        .iter()
        .filter(|(name, _)| name.starts_with("batchlog_flush_failures_total{"))
        .map(|(_, v)| *v)
        .sum();
    println!("Flush Failures:    {}", failures);

    if let Some(v) = values.get("batchlog_events_rejected_total") {
        println!("Events Rejected:   {}", v);
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
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
