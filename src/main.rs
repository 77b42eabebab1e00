use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ans_expenses::logging::init_logging;
use ans_expenses::{
    discover_periods, CsvRegistryProvider, CsvSink, DirectoryExtractProvider, Pipeline,
    PipelineConfig, PipelineError, RegistryProvider,
};

#[derive(Parser)]
#[command(name = "ans-expenses")]
#[command(about = "Consolidate and aggregate ANS assistance-expense extracts")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding <YYYY>/<quarter> extracts
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write both datasets
    Run {
        /// Where the CSV datasets go
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Operator registry CSV (CADOP report)
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Also import into this SQLite database
        #[arg(long)]
        database: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
        /// Also pack each CSV into a .zip
        #[arg(long)]
        zip: bool,
    },
    /// List the periods that would be processed
    Periods,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(raw_dir) = &cli.raw_dir {
        config.paths.raw_dir = raw_dir.clone();
    }
    Ok(config)
}

fn execute(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Periods => {
            let periods = discover_periods(&config.paths.raw_dir, config.discovery.max_periods)
                .with_context(|| format!("Failed to scan {}", config.paths.raw_dir.display()))?;
            if periods.is_empty() {
                println!("No periods found under {}", config.paths.raw_dir.display());
            }
            for period in periods {
                println!("{}\t{}", period.label(), period.locator);
            }
            Ok(())
        }
        Commands::Run {
            output_dir,
            registry,
            database,
            json,
            zip,
        } => {
            if let Some(dir) = output_dir {
                config.paths.output_dir = dir;
            }
            if registry.is_some() {
                config.paths.registry_file = registry;
            }
            if database.is_some() {
                config.paths.database = database;
            }
            if zip {
                config.output.archive = true;
            }
            run(config, json)
        }
    }
}

fn run(config: PipelineConfig, json: bool) -> Result<()> {
    // 1. Periods
    let periods = discover_periods(&config.paths.raw_dir, config.discovery.max_periods)
        .with_context(|| format!("Failed to scan {}", config.paths.raw_dir.display()))?;
    if periods.is_empty() {
        anyhow::bail!("No periods found under {}", config.paths.raw_dir.display());
    }

    // 2. Collaborators
    let extracts = DirectoryExtractProvider::new(&config)?;
    let registry = match &config.paths.registry_file {
        Some(path) => Some(CsvRegistryProvider::new(path, &config)?),
        None => None,
    };
    let registry_ref = registry.as_ref().map(|r| r as &dyn RegistryProvider);

    // 3. Run
    let pipeline = Pipeline::new(config.clone(), &extracts, registry_ref)?;
    let output = match pipeline.run(&periods) {
        Ok(output) => output,
        Err(PipelineError::AggregationEmpty) => {
            anyhow::bail!("No expense records found in any period; nothing written")
        }
        Err(e) => return Err(e.into()),
    };

    // 4. Persist
    let mut csv_sink = CsvSink::from_config(&config);
    output.persist(&mut csv_sink).context("Failed to write CSV datasets")?;

    if let Some(db_path) = &config.paths.database {
        persist_database(&output, db_path)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&output.report)?);
    } else {
        println!("✓ {}", output.report.summary());
        println!("✓ Consolidated: {}", csv_sink.consolidated_path().display());
        println!("✓ Aggregated:   {}", csv_sink.aggregated_path().display());
        for archive in csv_sink.archive_paths() {
            println!("✓ Archive:      {}", archive.display());
        }
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
fn persist_database(output: &ans_expenses::PipelineOutput, db_path: &std::path::Path) -> Result<()> {
    let mut sink = ans_expenses::SqliteSink::open(db_path, &output.report.run_id)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    output.persist(&mut sink).context("Failed to import into database")?;
    println!("✓ Imported into {}", db_path.display());
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
fn persist_database(_output: &ans_expenses::PipelineOutput, _db_path: &std::path::Path) -> Result<()> {
    anyhow::bail!("Database import not available; rebuild with --features sqlite")
}
