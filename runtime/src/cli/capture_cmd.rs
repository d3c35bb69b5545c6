//! `menu-capture capture`: run one capture against a remote browser.

use crate::cli::output;
use crate::config::{CaptureConfig, Overrides, ProviderConfig};
use crate::provision::ScrapybaraProvisioner;
use crate::run::{CaptureRunner, RunSummary};
use crate::session::chromium::ChromiumConnector;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Run the capture command.
pub async fn run(config_path: Option<&Path>, overrides: Overrides) -> Result<()> {
    let mut config =
        CaptureConfig::resolve(config_path).context("failed to load capture config")?;
    config.apply(overrides);

    let summary = run_with(config, ProviderConfig::from_env()).await?;
    report(&summary);

    if let Some(e) = &summary.error {
        bail!("capture run {} failed: {e}", summary.run_id);
    }
    Ok(())
}

/// Run one capture with an already-loaded config and provider credentials.
///
/// Config and credential errors surface before anything remote is started.
pub async fn run_with(
    config: CaptureConfig,
    provider: crate::Result<ProviderConfig>,
) -> Result<RunSummary> {
    config.validate()?;
    let provisioner = ScrapybaraProvisioner::new(provider?)?;

    let runner = CaptureRunner::new(config, Arc::new(provisioner), Arc::new(ChromiumConnector));
    let summary = runner
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(summary)
}

fn report(summary: &RunSummary) {
    if output::is_json() {
        match serde_json::to_value(summary) {
            Ok(value) => output::print_json(&value),
            Err(e) => eprintln!("  Error: failed to render summary: {e}"),
        }
        return;
    }
    if output::is_quiet() {
        return;
    }

    println!("Capture run {}", summary.run_id);
    println!("  records:  {}", summary.records);
    if let Some(walk) = &summary.walk {
        println!(
            "  items:    {} found, {} attempted, {} failed",
            walk.discovered,
            walk.attempted,
            walk.failures.len()
        );
        for failure in &walk.failures {
            println!("    item {}: {}", failure.index, failure.error);
        }
    }
    if let Some(stats) = &summary.intercept {
        println!(
            "  responses: {} matched, {} captured, {} failed",
            stats.seen, stats.captured, stats.failed
        );
    }
    if let Some(path) = &summary.output {
        println!("  output:   {}", path.display());
    }
    let elapsed = summary.finished_at - summary.started_at;
    println!("  elapsed:  {}s", elapsed.num_seconds());
}
