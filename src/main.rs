//! CLI Entry Point for lasesnap
//!
//! Provides command-line interface for:
//! - Discovering the light source and trigger
//! - Running a recipe (sequence, snapshot diff, aggregation)
//! - Re-aggregating a project output directory
//! - Reviewing a collection and summing a selection
//!
//! # Usage
//!
//! ```bash
//! lasesnap discover
//! lasesnap run --recipe recipe.toml --project leaf
//! lasesnap run --recipe recipe.toml --project leaf --dry-run
//! lasesnap aggregate --project leaf --date 03-07
//! lasesnap review output/ --select 0,2 --name leaf_selection
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lasesnap::config::Settings;
use lasesnap::cube::{aggregate::AggregationReport, aggregate::Aggregator, envi, render};
use lasesnap::hardware::discovery::{self, Markers, SystemDiscovery};
use lasesnap::hardware::mock::{CommandLog, MockDiscovery, MockSource, MockTrigger, SimulatedInstrument};
use lasesnap::hardware::Endpoints;
use lasesnap::naming::Project;
use lasesnap::recipe::Recipe;
use lasesnap::review::load_collection;
use lasesnap::session::AcquisitionSession;
use lasesnap::tracing_setup::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lasesnap")]
#[command(about = "Wavelength-stepped hyperspectral acquisition", long_about = None)]
struct Cli {
    /// Station configuration file
    #[arg(long, global = true, default_value = lasesnap::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the light source and the trigger
    Discover,

    /// Run a recipe and aggregate its shots
    Run {
        /// Recipe TOML file
        #[arg(long)]
        recipe: PathBuf,

        /// Project name (first field of every output name)
        #[arg(long)]
        project: String,

        /// Use simulated hardware that writes cubes into the watch directory
        #[arg(long)]
        dry_run: bool,
    },

    /// Aggregate the shot folders already copied for a project
    Aggregate {
        /// Project name
        #[arg(long)]
        project: String,

        /// Date stamp (MM-DD) for output names; defaults to today
        #[arg(long)]
        date: Option<String>,
    },

    /// Load a collection and sum selected entries
    Review {
        /// Directory of shot folders
        dir: PathBuf,

        /// Comma-separated entry indices to sum
        #[arg(long, value_delimiter = ',')]
        select: Vec<usize>,

        /// Output stem for the summed cube and image
        #[arg(long, default_value = "selection")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let tracing = TracingConfig::from_settings(&settings)?
        .with_format(cli.log_format)
        .verbose(cli.verbose);
    tracing_setup::init(tracing)?;

    match cli.command {
        Commands::Discover => discover(&settings).await,
        Commands::Run {
            recipe,
            project,
            dry_run,
        } => run(settings, recipe, project, dry_run).await,
        Commands::Aggregate { project, date } => aggregate(settings, project, date).await,
        Commands::Review { dir, select, name } => review(&settings, dir, select, name).await,
    }
}

async fn discover(settings: &Settings) -> Result<()> {
    let backend = SystemDiscovery::new(Duration::from_millis(settings.devices.source_timeout_ms));
    let found = discovery::discover(&backend, &Markers::from(&settings.devices)).await?;
    println!("Light source: {} ({})", found.source.address, found.source.identity);
    println!("Trigger:      {} ({})", found.trigger.address, found.trigger.identity);
    Ok(())
}

async fn run(settings: Settings, recipe: PathBuf, project: String, dry_run: bool) -> Result<()> {
    let recipe = Recipe::load(&recipe)?;
    recipe.validate()?;
    let project = Project::new(project, &settings.storage.output_dir)?;
    println!(
        "📋 {} steps, {} shots, ~{} s",
        recipe.len(),
        recipe.total_shots(),
        estimated_seconds(&recipe)
    );

    let mut session = AcquisitionSession::new(settings.clone(), project, recipe);
    if dry_run {
        session.discover(&MockDiscovery::station()).await?;
        let log = CommandLog::new();
        let instrument = SimulatedInstrument::new(&settings.storage.watch_dir, &settings.cube);
        session.use_endpoints(Endpoints {
            source: Box::new(MockSource::new(log.clone())),
            trigger: Box::new(MockTrigger::new(log).with_instrument(instrument)),
        })?;
    } else {
        let backend =
            SystemDiscovery::new(Duration::from_millis(settings.devices.source_timeout_ms));
        session.discover(&backend).await?;
        session.connect()?;
    }

    let cancel = session.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling before the next shot...");
            cancel.cancel();
        }
    });
    let outcome = session.start_run().await.cloned();
    ctrl_c.abort();
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if e.is_retryable() {
                eprintln!("🔁 Nothing was copied; the run can be started again");
            }
            return Err(e.into());
        }
    };
    println!(
        "✅ {} shots fired, {} new folders ({} already present)",
        result.shots_fired,
        session.new_folders().len(),
        session.pre_run_snapshot().map_or(0, |s| s.len())
    );

    let report = session.aggregate().await?;
    print_report(&report);
    Ok(())
}

async fn aggregate(settings: Settings, project: String, date: Option<String>) -> Result<()> {
    let project = Project::new(project, &settings.storage.output_dir)?;
    let mut aggregator = Aggregator::new(project, settings.cube.clone())?;
    if let Some(date) = date {
        aggregator = aggregator.with_date(date);
    }
    let report = tokio::task::spawn_blocking(move || aggregator.aggregate_output_dir())
        .await
        .context("Aggregation task panicked")??;
    print_report(&report);
    Ok(())
}

async fn review(settings: &Settings, dir: PathBuf, select: Vec<usize>, name: String) -> Result<()> {
    let cube_config = settings.cube.clone();
    let rgb = cube_config.rgb()?;
    let mut collection = tokio::task::spawn_blocking({
        let dir = dir.clone();
        move || load_collection(&dir, &cube_config)
    })
    .await
    .context("Review loading task panicked")??;

    for entry in collection.entries() {
        let (rows, cols, bands) = entry.cube.shape();
        println!(
            "[{}] {:<8} shot {:<3} {}x{}x{}  {}",
            entry.handle.index(),
            entry.wavelength,
            entry.shot_index,
            rows,
            cols,
            bands,
            entry.folder.display()
        );
    }
    if select.is_empty() {
        return Ok(());
    }

    let handles = select
        .iter()
        .map(|&i| {
            collection
                .handle(i)
                .with_context(|| format!("No entry {i} in the collection"))
        })
        .collect::<Result<Vec<_>>>()?;
    collection.select(handles)?;
    let sum = collection.sum_selected()?;

    let header = dir.join(format!("{name}.hdr"));
    let raw = dir.join(format!("{name}.dat"));
    let image = dir.join(format!("{name}.png"));
    envi::write_cube(&header, &raw, &sum)?;
    render::save_false_color(&sum, rgb, &image)?;
    println!("✅ Summed {} cubes into {}", select.len(), header.display());
    Ok(())
}

fn estimated_seconds(recipe: &Recipe) -> u64 {
    use lasesnap::sequencer::{SHOT_INTERVAL, WAVELENGTH_SETTLE_DELAY};
    recipe.len() as u64 * WAVELENGTH_SETTLE_DELAY.as_secs()
        + recipe.total_shots() as u64 * SHOT_INTERVAL.as_secs()
}

fn print_report(report: &AggregationReport) {
    for group in &report.written {
        println!(
            "🖼  {:<8} {} cubes -> {}",
            group.wavelength,
            group.members,
            group.image.display()
        );
    }
    for failure in &report.failed {
        eprintln!("❌ {:<8} {}", failure.wavelength, failure.error);
    }
}
