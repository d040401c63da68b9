//! Frontmatter Sync command line
//!
//! Reads and writes single frontmatter fields of a Markdown vault through the
//! synchronization engine, so edits go through the same path-update, tick and
//! flush cycle bound fields use.

use std::path::PathBuf;
use std::sync::Arc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use frontmatter_sync::core::config::StorageType;
use frontmatter_sync::core::{init_logging, Config};
use frontmatter_sync::storage::create_backend;
use frontmatter_sync::sync::{BindTarget, BoundField, IntervalScheduler, MetadataManager};
use frontmatter_sync::{Error, Result};
use tracing::{debug, info};

fn cli() -> Command {
    Command::new("frontmatter-sync")
        .version(frontmatter_sync::VERSION)
        .about("Echo-safe frontmatter synchronization for Markdown vaults.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file path")
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .global(true)
                .help("Vault directory")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("Log level (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print sync metrics to stderr on exit")
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("get")
                .about("Print the value stored at a path")
                .arg(Arg::new("file").required(true).help("Note name, relative to the vault"))
                .arg(Arg::new("path").required(true).help("Dotted path, e.g. tags[0] or author.name"))
        )
        .subcommand(
            Command::new("set")
                .about("Store a value at a path")
                .arg(Arg::new("file").required(true).help("Note name, relative to the vault"))
                .arg(Arg::new("path").required(true).help("Dotted path, e.g. tags[0] or author.name"))
                .arg(Arg::new("value").required(true).help("JSON value; anything unparsable is stored as a string"))
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    // Load configuration
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            config
        }
    };
    apply_cli_overrides(&mut config, &matches)?;

    init_logging(&config.logging);
    info!("Starting {} v{}", frontmatter_sync::NAME, frontmatter_sync::VERSION);

    let backend = create_backend(&config.storage);
    let scheduler = Arc::new(IntervalScheduler::new(config.sync.tick_interval));
    let manager = MetadataManager::new(backend.adapter(), scheduler, config.sync.clone())?;
    let resolver = backend.resolver();

    let (command, args) = matches
        .subcommand()
        .ok_or_else(|| Error::config("no command given"))?;
    let file = required(args, "file")?;
    let target = BindTarget::parse(&format!("{}#{}", file, required(args, "path")?))?;
    let (document, path) = target.resolve(resolver.as_ref(), None)?;

    let field = BoundField::bind(&manager, document, path);
    manager.settle().await;
    if !field.handle().map_or(false, |h| h.is_loaded()) {
        // Surface the adapter's own error instead of a generic one
        backend.adapter().read(document).await?;
    }

    match command {
        "get" => {
            println!("{}", render(&field.value())?);
        }
        "set" => {
            let raw = required(args, "value")?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            if field.push(value)? {
                info!("Updated {}", target);
            } else {
                info!("{} already holds that value", target);
            }
        }
        other => return Err(Error::config(format!("unknown command: {}", other))),
    }

    drop(field);
    manager.close().await;

    if matches.get_flag("metrics") && config.metrics.enabled {
        eprintln!("{}", manager.metrics().gather_text()?);
    }
    debug!("Done");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.storage.data_dir = PathBuf::from(data_dir);
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    // The CLI always operates on a vault
    config.storage.storage_type = StorageType::Markdown;

    config.validate()
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| Error::config(format!("missing argument: {}", name)))
}

fn render(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string_pretty(other)
            .map_err(|e| Error::internal(format!("cannot render value: {}", e))),
    }
}
