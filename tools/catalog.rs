use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use library::{Catalog, CatalogError, Field, ScanControl, ScanOptions, SyncOutcome};
use metadata::LoftyCodec;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{apply_env_overrides, config_path_from_env, load_or_create_config, resolve_path};

const USAGE: &str = "usage: catalog [scan [ROOT] | list | set ID FIELD VALUE | delete ID | push ID FIELD | errors [LIMIT] [OFFSET] | stats]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (mut config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }
    apply_env_overrides(&mut config);

    let catalog_path = resolve_path(&config_path, &config.catalog_path);
    let catalog = Catalog::open(&catalog_path, Arc::new(LoftyCodec))?;

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] | ["scan"] => {
            let root = resolve_path(&config_path, &config.music_root);
            scan(&catalog, root, config.scan_batch_size)
        }
        ["scan", root] => scan(&catalog, PathBuf::from(root), config.scan_batch_size),
        ["list"] => {
            let rows = catalog.list_tracks()?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        ["set", id, field, value] => {
            let id = parse_id(id)?;
            let field: Field = field.parse()?;
            match catalog.set_field(id, field, value) {
                Ok(SyncOutcome::Applied) => println!("track {} {} = {:?}", id, field, value),
                Ok(SyncOutcome::Unchanged) => println!("track {} {} unchanged", id, field),
                Err(err @ CatalogError::PartialSync { .. }) => {
                    warn!("{}; retry with `catalog push {} {}`", err, id, field);
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
            Ok(())
        }
        ["delete", id] => {
            let id = parse_id(id)?;
            if catalog.delete_track(id)? {
                println!("deleted track {}", id);
            } else {
                println!("no track {}", id);
            }
            Ok(())
        }
        ["push", id, field] => {
            let id = parse_id(id)?;
            let field: Field = field.parse()?;
            catalog.push_field(id, field)?;
            println!("wrote track {} {} to file", id, field);
            Ok(())
        }
        ["errors", rest @ ..] if rest.len() <= 2 => {
            let limit = match rest.first() {
                Some(value) => value.parse::<usize>()?,
                None => 50,
            };
            let offset = match rest.get(1) {
                Some(value) => value.parse::<usize>()?,
                None => 0,
            };
            let (items, total) = catalog.list_tag_error_files(limit, offset)?;
            for item in &items {
                println!("{}\t{}", item.path, item.error);
            }
            println!("{} of {} files with unreadable tags", items.len(), total);
            Ok(())
        }
        ["stats"] => {
            let stats = catalog.stats()?;
            println!(
                "Cataloged: {} performers, {} albums, {} tracks",
                stats.performers, stats.albums, stats.tracks
            );
            Ok(())
        }
        _ => Err(USAGE.into()),
    }
}

fn scan(
    catalog: &Catalog,
    root: PathBuf,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let control = ScanControl::new();
    watch_for_shutdown(control.clone());
    let options = ScanOptions {
        batch_size,
        control,
    };
    let report = catalog.ingest_directory_with(&root, &options)?;
    let stats = catalog.stats()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        "Cataloged: {} performers, {} albums, {} tracks",
        stats.performers, stats.albums, stats.tracks
    );
    Ok(())
}

fn parse_id(value: &str) -> Result<u64, Box<dyn std::error::Error>> {
    value
        .parse::<u64>()
        .map_err(|_| format!("invalid track id {:?}", value).into())
}

/// Cancels `control` on Ctrl-C or SIGTERM. The scan stops between files and
/// keeps everything it already committed.
fn watch_for_shutdown(control: ScanControl) {
    let spawned = thread::Builder::new()
        .name("shutdown-watch".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("Failed to start signal runtime: {}", err);
                    return;
                }
            };
            if runtime.block_on(shutdown_signal()) {
                control.cancel();
            }
        });
    if let Err(err) = spawned {
        warn!("Failed to spawn signal watcher: {}", err);
    }
}

/// True once a stop signal arrives; false if no handler could be installed.
async fn shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return false;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
            return false;
        }
    }

    info!("Stop requested; finishing the current file.");
    true
}
