//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    job_running: bool,
    #[serde(default)]
    uptime_seconds: u64,
    components: HashMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show health and metrics of a running publisher.
pub async fn run(url: &str) -> Result<()> {
    let base = url.trim_end_matches('/');
    println!("Checking health at {}...\n", base);

    let client = reqwest::Client::new();

    match client.get(format!("{}/health", base)).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => print_health_status(&health, status_code.as_u16()),
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs a publisher running with monitoring.http_port set?");
            println!("Start one with: rowcast publish --config <path> --http-port <port>");
            return Ok(());
        }
    }

    println!("\n--- Metrics ---");
    let text = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .context("Failed to fetch metrics")?
        .text()
        .await
        .context("Failed to read metrics")?;
    print_metrics(&text);

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
        "Run in progress: {}   Uptime: {}s",
        if health.job_running { "yes" } else { "no" },
        health.uptime_seconds
    );
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        let mut names: Vec<_> = health.components.keys().collect();
        names.sort();
        for name in names {
            let status = &health.components[name];
            match &status.message {
                Some(msg) => println!(
                    "  {} {}: {} ({})",
                    status_tag(&status.status),
                    name,
                    status.status,
                    msg
                ),
                None => println!("  {} {}: {}", status_tag(&status.status), name, status.status),
            }
        }
    }
}

/// Pull plain `name value` samples out of Prometheus text.
fn parse_samples(metrics_text: &str) -> HashMap<&str, u64> {
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
    let values = parse_samples(metrics_text);

    let rows = [
        ("rowcast_rows_read_total", "Rows Read:     "),
        ("rowcast_delivered_total", "Delivered:     "),
        ("rowcast_undelivered_total", "Undelivered:   "),
        ("rowcast_rejected_total", "Rejected:      "),
        ("rowcast_delivery_attempts_total", "Attempts:      "),
        ("rowcast_errors_total", "Errors:        "),
    ];
    for (name, label) in rows {
        if let Some(v) = values.get(name) {
            println!("{}{}", label, format_number(*v));
        }
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
