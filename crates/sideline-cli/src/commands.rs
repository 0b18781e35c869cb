//! Subcommand implementations. Each returns the text to print.

use anyhow::{Context, Result};
use serde::Serialize;
use sideline_core::{clamp_reasons, parse_reasons, ClampOptions, TrustMetadata};
use sideline_runtime::{RuntimeConfig, ServiceHealth, WorkersClient};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

pub fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read reasons from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
    }
}

pub fn clamp_options(max_chips: Option<usize>, max_abs_total: Option<f64>, extended: bool) -> ClampOptions {
    let mut options = if extended {
        ClampOptions::extended()
    } else {
        ClampOptions::default()
    };
    if let Some(max_chips) = max_chips {
        options = options.with_max_chips(max_chips);
    }
    if let Some(max_abs_total) = max_abs_total {
        options = options.with_max_abs_total(max_abs_total);
    }
    options
}

pub fn clamp(source: &str, options: &ClampOptions) -> Result<String> {
    let reasons = parse_reasons(source).context("Input is not a JSON array of reasons")?;
    let chips = clamp_reasons(&reasons, options);

    tracing::debug!(input = reasons.len(), kept = chips.len(), "Clamped reasons");
    Ok(serde_json::to_string_pretty(&chips)?)
}

pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    }
    .apply_env();

    config.validate()?;
    Ok(config)
}

#[derive(Serialize)]
struct FetchReport {
    url: String,
    status: u16,
    shared: bool,
    trust: TrustMetadata,
    body: serde_json::Value,
    health: Vec<ServiceHealth>,
}

pub async fn fetch(config: RuntimeConfig, path: &str, repeat: usize) -> Result<String> {
    let client = WorkersClient::from_config(config).context("Failed to build Workers API client")?;
    let url = client.url(path);
    let repeat = repeat.max(1);

    tracing::info!(%url, repeat, "Fetching");
    let results = futures::future::join_all((0..repeat).map(|_| client.get(path))).await;

    let mut responses = Vec::with_capacity(results.len());
    for result in results {
        responses.push(result.with_context(|| format!("GET {} failed", url))?);
    }
    let first = &responses[0];
    let shared = responses.iter().all(|r| Arc::ptr_eq(r, first));

    // Non-JSON bodies are reported as a string.
    let body = serde_json::from_str(&first.body)
        .unwrap_or_else(|_| serde_json::Value::String(first.body.clone()));

    let report = FetchReport {
        url,
        status: first.status,
        shared,
        trust: first.trust.clone(),
        body,
        health: client.health(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}
