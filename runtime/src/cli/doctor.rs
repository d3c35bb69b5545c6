//! Environment readiness check.

use crate::cli::output::check_mark;
use crate::config::{CaptureConfig, ProviderConfig, API_KEY_ENV};
use crate::provision::ScrapybaraProvisioner;
use anyhow::Result;
use std::path::Path;

/// Check credentials, config, output location, and provider reachability.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("menu-capture doctor");
    println!("===================");
    println!();

    let mut ready = true;

    let provider = ProviderConfig::from_env();
    match &provider {
        Ok(cfg) => println!("{} {API_KEY_ENV} is set (API: {})", check_mark(true), cfg.base_url),
        Err(_) => {
            ready = false;
            println!("{} {API_KEY_ENV} is NOT set", check_mark(false));
        }
    }

    match CaptureConfig::resolve(config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => {
            println!("{} Config valid (target: {})", check_mark(true), config.target_url);
            let dir = config
                .output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let writable = dir.exists()
                && std::fs::metadata(dir)
                    .map(|m| !m.permissions().readonly())
                    .unwrap_or(false);
            println!(
                "{} Output directory {} {}",
                check_mark(writable),
                dir.display(),
                if writable { "is writable" } else { "is not writable" }
            );
            ready &= writable;
        }
        Err(e) => {
            ready = false;
            println!("{} Config invalid: {e}", check_mark(false));
        }
    }

    if let Ok(cfg) = provider {
        match ScrapybaraProvisioner::new(cfg) {
            Ok(provisioner) => match provisioner.check_reachable().await {
                Ok(status) => println!("{} Provisioning API reachable (HTTP {status})", check_mark(true)),
                Err(e) => {
                    ready = false;
                    println!("{} Provisioning API unreachable: {e}", check_mark(false));
                }
            },
            Err(e) => {
                ready = false;
                println!("{} Could not build HTTP client: {e}", check_mark(false));
            }
        }
    }

    println!();
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}
