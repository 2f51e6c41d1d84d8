use chrono::DateTime;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gallery_core::media::geotag::ExifGeotagger;
use gallery_core::state::controller::ControllerSettings;
use gallery_core::state::data::validate_title;
use gallery_core::state::library::Library;
use gallery_core::{Error, FilterMode, GalleryConfig, GeoPoint, MediaController, MediaRecord, Result};

/// Command line front end for the gallery
#[derive(Debug, Parser)]
#[command(name = "gallery", version, about = "Local photo gallery with geotags")]
struct Cli {
    /// Configuration file (defaults to <config dir>/gallery/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a new entry, optionally from a local image
    Add {
        /// Title (defaults to "Media Item N")
        #[arg(long)]
        title: Option<String>,
        /// Image to copy into the gallery
        #[arg(long)]
        image: Option<PathBuf>,
        /// Mark the entry as a remote placeholder
        #[arg(long)]
        remote: bool,
        /// Fallback latitude when the image carries no geotag
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Fallback longitude when the image carries no geotag
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// List entries
    List {
        /// all, local or remote
        #[arg(long, default_value = "all")]
        filter: FilterMode,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// List entries that can be placed on a map
    Map {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change an entry's title, source or location
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Delete an entry
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Remove copied images that no entry refers to
    Prune,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gallery_core=info,gallery=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = GalleryConfig::load(cli.config.as_deref())?;
    let library = Library::open(&config.database_path())?;
    info!(items = library.count()?, "gallery initialized");

    let controller = MediaController::new(
        Arc::new(library),
        Arc::new(ExifGeotagger),
        ControllerSettings::from(&config),
    );
    controller.refresh().await?;

    match cli.command {
        Command::Add { title, image, remote, lat, lon } => {
            let title = match title {
                Some(title) => validate_title(&title)?,
                None => controller.snapshot().default_title(),
            };

            let source = match image {
                Some(image) => {
                    let selection = controller.select_image(image.clone()).await;
                    match selection.path {
                        Some(path) => Some(path.to_string_lossy().into_owned()),
                        None => {
                            eprintln!("⚠️  Could not copy {}", image.display());
                            return Err(Error::Io(io::Error::other(format!(
                                "cannot read {}",
                                image.display()
                            ))));
                        }
                    }
                }
                None => None,
            };

            let fallback = lat.zip(lon).map(|(lat, lon)| GeoPoint::new(lat, lon));
            let created = controller.create_item(title, source, remote, fallback).await?;
            println!("✅ Added #{} {}", created.id, created.title);
        }
        Command::List { filter, json } => {
            controller.set_filter(filter);
            let state = controller.snapshot();
            if json {
                return print_json(&state.visible_items);
            }
            for record in &state.visible_items {
                println!("{}", format_record(record));
            }
            println!("{} of {} items", state.visible_items.len(), state.all_items.len());
        }
        Command::Map { json } => {
            let state = controller.snapshot();
            if json {
                return print_json(&state.items_with_location);
            }
            for record in &state.items_with_location {
                println!("{}", format_record(record));
            }
            println!("{} items with location", state.items_with_location.len());
        }
        Command::Edit { id, title, source, lat, lon } => {
            let mut record = find(&controller, id)?;
            controller.request_edit(record.clone());

            if let Some(title) = title {
                record.title = validate_title(&title)?;
            }
            if let Some(source) = source {
                record.source = source;
            }
            if let Some((lat, lon)) = lat.zip(lon) {
                record.location = Some(GeoPoint::new(lat, lon));
            }

            let saved = controller.commit_edit(record).await?;
            println!("✅ Updated #{} {}", saved.id, saved.title);
        }
        Command::Delete { id, yes } => {
            let record = find(&controller, id)?;
            controller.request_delete(record.clone());

            if !yes && !confirm(&format!("Delete \"{}\"?", record.title))? {
                controller.cancel_delete();
                println!("Kept #{}", record.id);
                return Ok(());
            }

            if controller.confirm_delete(|_| {}).await {
                println!("🗑️  Deleted #{} {}", record.id, record.title);
            } else {
                return Err(Error::NotFound(record.id));
            }
        }
        Command::Prune => {
            let removed = controller.prune_orphans().await?;
            println!("🧹 Removed {} unreferenced images", removed);
        }
    }

    Ok(())
}

fn find(controller: &MediaController, id: i64) -> Result<MediaRecord> {
    controller
        .snapshot()
        .all_items
        .into_iter()
        .find(|r| r.id == id)
        .ok_or(Error::NotFound(id))
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_json(records: &[MediaRecord]) -> Result<()> {
    let out = serde_json::to_string_pretty(records).map_err(io::Error::from)?;
    println!("{}", out);
    Ok(())
}

fn format_record(record: &MediaRecord) -> String {
    let location = record
        .location
        .map(|p| format!("{:.6},{:.6}", p.latitude, p.longitude))
        .unwrap_or_else(|| "-".to_string());
    let created = DateTime::from_timestamp_millis(record.created_at)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let kind = if record.is_remote { "remote" } else { "local" };

    format!(
        "{:>5}  {:<24}  {:<6}  {:<22}  {}  {}",
        record.id, record.title, kind, location, created, record.source
    )
}
