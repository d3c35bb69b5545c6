//! CLI subcommand implementations for the menu-capture binary.

pub mod capture_cmd;
pub mod doctor;
pub mod output;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at info, or debug with `verbose`.
pub fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("menu_capture={level}")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
