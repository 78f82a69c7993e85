//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use tessera_collab::ServerConfig;

/// Tessera collaborative ANSI art server.
///
/// CLI values override the config file, which overrides the defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "tessera", version, about = "Collaborative ANSI art server")]
pub struct CliArgs {
    /// JSON config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8000.
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding document.json and cells.bin.
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Seconds between background saves.
    #[arg(long)]
    pub persist_interval: Option<u64>,

    /// Width of a fresh document.
    #[arg(long)]
    pub columns: Option<u16>,

    /// Height of a fresh document.
    #[arg(long)]
    pub rows: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Seed the document from an XBin file instead of storage.
    #[arg(long)]
    pub import: Option<PathBuf>,

    /// Write the document here on shutdown (.ans for ANSI, XBin otherwise).
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Apply CLI overrides to a loaded config.
pub fn apply_cli_overrides(config: &mut ServerConfig, args: &CliArgs) {
    if let Some(ref bind) = args.bind {
        config.bind_addr = bind.clone();
    }
    if let Some(ref dir) = args.storage {
        config.storage_dir = Some(dir.clone());
    }
    if let Some(secs) = args.persist_interval {
        config.persist_interval_secs = secs;
    }
    if let Some(columns) = args.columns {
        config.columns = columns;
    }
    if let Some(rows) = args.rows {
        config.rows = rows;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }
}
