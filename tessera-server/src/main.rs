//! Tessera server binary.
//!
//! Loads the config, restores or imports the document, serves until
//! Ctrl-C and saves once more on the way out.

use std::path::Path;

use clap::Parser;
use log::{error, info};
use tessera_collab::{DocumentStore, ServerConfig, SyncServer};

mod cli;

use cli::{apply_cli_overrides, CliArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    apply_cli_overrides(&mut config, &args);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    let server = match &args.import {
        Some(path) => {
            let store = DocumentStore::import_xbin(&std::fs::read(path)?)?;
            let doc = store.document();
            info!(
                "Imported {}x{} document from {}",
                doc.columns(),
                doc.rows(),
                path.display()
            );
            SyncServer::with_document(config, store)
        }
        None => SyncServer::recover(config)?,
    };

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
        }
    }

    if let Err(e) = server.shutdown_save().await {
        error!("Final save failed: {e}");
    }
    if let Some(path) = &args.export {
        export(&server, path).await?;
        info!("Exported document to {}", path.display());
    }
    Ok(())
}

/// `.ans` files get the ANSI stream, anything else XBin.
async fn export(server: &SyncServer, path: &Path) -> std::io::Result<()> {
    let ansi = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ans"));
    let bytes = server
        .broadcaster()
        .with_store(|store| {
            if ansi {
                store.export_ansi()
            } else {
                store.export_xbin()
            }
        })
        .await;
    tokio::fs::write(path, bytes).await
}
