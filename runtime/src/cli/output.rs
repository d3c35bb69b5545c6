//! Terminal output helpers shared by subcommands.

/// Whether `--json` was requested.
pub fn is_json() -> bool {
    std::env::var("MENU_CAPTURE_JSON").is_ok()
}

/// Whether `--quiet` was requested.
pub fn is_quiet() -> bool {
    std::env::var("MENU_CAPTURE_QUIET").is_ok()
}

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("  Error: failed to render JSON: {e}"),
    }
}

/// Status marker for a doctor check line.
pub fn check_mark(ok: bool) -> &'static str {
    if ok {
        "[OK]"
    } else {
        "[!!]"
    }
}
