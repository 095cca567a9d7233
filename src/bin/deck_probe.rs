//! Capability probe for a deck file.
//!
//! Prints the layouts, placeholder geometry and theme of a document as JSON.
//!
//! ## Usage
//!
//! ```bash
//! deck_probe deck.json          # declared geometry only
//! deck_probe deck.json --deep   # realize each layout and measure it
//! ```
//!
//! ## Environment Variables
//!
//! - `DECK_KERNEL_LOCK_WAIT_MS`, `DECK_KERNEL_STALE_LOCK_MS`, `DECK_KERNEL_PROBE_TIMEOUT_MS`, `DECK_KERNEL_MAX_PROBE_LAYOUTS`
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)

use std::process::ExitCode;

use tracing::{error, info};

use deck_kernel::telemetry::init_tracing;
use deck_kernel::{DeckEngine, EngineConfig};

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let deep = args.iter().any(|a| a == "--deep");
    let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("usage: deck_probe <document.json> [--deep]");
        return ExitCode::from(2);
    };

    let engine = DeckEngine::new(EngineConfig::from_env());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %path,
        deep,
        "Starting capability probe"
    );

    let result = engine
        .with_session(path, |session| session.probe(deep))
        .and_then(|snapshot| Ok(serde_json::to_string_pretty(&snapshot)?));

    match result {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "probe failed");
            eprintln!("{}", serde_json::json!({ "error": e.code(), "message": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}
