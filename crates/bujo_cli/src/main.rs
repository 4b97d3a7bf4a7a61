//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `bujo_core` wiring: config, logging, database bootstrap.
//! - Print a deterministic, read-only summary of the journal for quick sanity checks.
//!
//! Usage: `bujo [path/to/bujo.toml]`

use bujo_core::config::CONFIG_FILE_NAME;
use bujo_core::db::open_db;
use bujo_core::{
    init_from_config, load_config, CollectionType, DocKind, DocumentStore, SqliteDocumentStore,
};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("event=cli_run module=cli status=error error={err}");
            eprintln!("bujo: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = load_config(&config_path)?;
    init_from_config(&config.logging)?;

    println!("bujo_core ping={}", bujo_core::ping());
    println!("bujo_core version={}", bujo_core::core_version());

    let conn = open_db(&config.db_path)?;
    // Raw store read: rehydrating would prune empty calendar collections,
    // and this summary must not write.
    let store = SqliteDocumentStore::try_new(&conn)?;
    let collections = store.find(DocKind::Collection, None)?.collections;

    println!("journal db={}", config.db_path.display());
    println!("journal collections={}", collections.len());
    for kind in [
        CollectionType::Day,
        CollectionType::Month,
        CollectionType::MonthCal,
        CollectionType::Future,
        CollectionType::Generic,
    ] {
        let count = collections.iter().filter(|c| c.kind == kind).count();
        println!("journal collections.{kind}={count}");
    }
    let deletable = collections
        .iter()
        .filter(|collection| collection.is_deletion_eligible())
        .count();
    println!("journal collections.deletable={deletable}");
    if let Some(sync) = &config.sync {
        println!("journal remote={}", sync.endpoint());
    }
    Ok(())
}
