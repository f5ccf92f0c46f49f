//! Configuration loading for mcp-ykman.
//!
//! The only setting is the path to the ykman executable, resolved from four
//! fallback sources (tried in order):
//!
//! 1. **CLI flag** — `--ykman <path>`
//! 2. **JSON file** via `--config <path>` CLI flag
//! 3. **JSON file** via `YKMAN_MCP_CONFIG` environment variable
//! 4. **Environment variable** — `YKMAN_PATH`
//!
//! With none of these set, `ykman` is looked up on `PATH` at invocation time.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// CLI arguments parsed by `clap`.
#[derive(Parser)]
#[command(name = "mcp-ykman", about = "MCP server for YubiKey management via ykman")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the ykman executable (overrides config file and environment)
    #[arg(long)]
    pub ykman: Option<PathBuf>,
}

/// Raw JSON config file structure.
#[derive(Deserialize)]
struct FileConfig {
    ykman_path: Option<String>,
}

/// Validated configuration.
pub struct ResolvedConfig {
    pub ykman_path: PathBuf,
}

/// Resolve configuration from CLI args, config file, or env vars.
pub fn load_config(cli: &Cli) -> Result<ResolvedConfig, String> {
    if let Some(path) = &cli.ykman {
        return validated(expand_tilde(path));
    }

    if let Some(path) = &cli.config {
        return load_from_file(&expand_tilde(path));
    }
    if let Ok(path) = std::env::var("YKMAN_MCP_CONFIG") {
        return load_from_file(&expand_tilde(&PathBuf::from(path)));
    }

    if let Ok(path) = std::env::var("YKMAN_PATH") {
        return validated(expand_tilde(&PathBuf::from(path)));
    }

    Ok(ResolvedConfig {
        ykman_path: PathBuf::from("ykman"),
    })
}

fn load_from_file(path: &PathBuf) -> Result<ResolvedConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

    let config: FileConfig = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

    match config.ykman_path {
        Some(p) => validated(expand_tilde(&PathBuf::from(p))),
        None => Ok(ResolvedConfig {
            ykman_path: PathBuf::from("ykman"),
        }),
    }
}

fn validated(path: PathBuf) -> Result<ResolvedConfig, String> {
    if path.as_os_str().is_empty() {
        return Err("ykman path is empty".into());
    }
    Ok(ResolvedConfig { ykman_path: path })
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.clone()
}
