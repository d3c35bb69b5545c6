// Copyright 2026 Cortex Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use menu_capture::cli;
use menu_capture::config::Overrides;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "menu-capture",
    about = "Capture structured item data from a remote browser by walking a menu page",
    version,
    after_help = "Run 'menu-capture <command> --help' for details on each command.\nRun 'menu-capture' with no command to capture with the default settings."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the target page and capture every matching response
    Capture(CaptureArgs),
    /// Check credentials, config, and provider reachability
    Doctor {
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[derive(Args, Default)]
struct CaptureArgs {
    /// Page to open
    #[arg(long)]
    url: Option<String>,
    /// Output JSON file
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Substring identifying the data request
    #[arg(long)]
    pattern: Option<String>,
    /// Dotted path of the sub-document to keep (e.g. "data.itemPage")
    #[arg(long)]
    extract_path: Option<String>,
    /// CSS selector matching each item
    #[arg(long)]
    item_selector: Option<String>,
    /// CSS selector of the control closing an opened item
    #[arg(long)]
    dismiss_selector: Option<String>,
}

impl CaptureArgs {
    fn split(self) -> (Option<PathBuf>, Overrides) {
        let overrides = Overrides {
            target_url: self.url,
            output: self.output,
            url_pattern: self.pattern,
            extract_path: self.extract_path,
            item_selector: self.item_selector,
            dismiss_selector: self.dismiss_selector,
        };
        (self.config, overrides)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("MENU_CAPTURE_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("MENU_CAPTURE_QUIET", "1");
    }

    if !matches!(cli.command, Some(Commands::Completions { .. })) {
        cli::init_tracing(cli.verbose, cli.log_json);
    }

    let result = match cli.command {
        None => {
            let (config, overrides) = CaptureArgs::default().split();
            cli::capture_cmd::run(config.as_deref(), overrides).await
        }
        Some(Commands::Capture(args)) => {
            let (config, overrides) = args.split();
            cli::capture_cmd::run(config.as_deref(), overrides).await
        }
        Some(Commands::Doctor { config }) => cli::doctor::run(config.as_deref()).await,
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "menu-capture", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else if !cli::output::is_quiet() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
