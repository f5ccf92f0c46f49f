//! # mcp-ykman
//!
//! MCP (Model Context Protocol) server that manages YubiKeys by driving the
//! external `ykman` command-line tool. Runs as a stdio JSON-RPC server —
//! designed to be launched by an AI agent host (e.g. Claude Code).
//!
//! ## Architecture
//!
//! ```text
//! main.rs         — entry point, config loading, MCP server launch
//! config.rs       — CLI / JSON file / env-var configuration loading
//! ykman.rs        — child-process invoker and failure classification
//! devices.rs      — device enumeration, descriptors, serial extraction
//! orchestrator.rs — command execution with a bounded disambiguation retry
//! elicit.rs       — suspended device-choice sessions (MCP elicitation)
//! envelope.rs     — uniform structured results
//! mcp.rs          — MCP JSON-RPC protocol handler (stdio)
//! tools.rs        — tool definitions and handlers
//! ```
//!
//! ## Tools
//!
//! - `list_yubikeys`, `get_yubikey_info`, `ykman_version`
//! - `enable_application`, `disable_application`
//! - `set_openpgp_touch_policy`, `set_piv_pin_retries`
//!
//! When several YubiKeys are attached and a device-scoped tool is called
//! without a serial, the server asks the operator which key to use via MCP
//! elicitation and retries exactly once with the selected serial.

mod config;
mod devices;
mod elicit;
mod envelope;
mod mcp;
mod orchestrator;
mod tools;
mod ykman;

use clap::Parser;
use tracing::info;

use config::Cli;
use ykman::YkmanRunner;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // stdout carries the protocol; logs go to stderr.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let resolved = match config::load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-ykman: configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "mcp-ykman v{} starting, ykman at {}",
        env!("CARGO_PKG_VERSION"),
        resolved.ykman_path.display()
    );

    let runner = YkmanRunner::new(resolved.ykman_path);
    mcp::run_stdio(runner).await;
}
