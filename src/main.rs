use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use hpc_export::app::{open_store, ExportUseCase, RevealUseCase, RunSummary};
use hpc_export::config::Config;
use hpc_export::constants;
use hpc_export::infra::{CsvOutputAdapter, FileSecurityLog};
use hpc_export::pipeline::emit::CsvEmitter;
use hpc_export::types::{RecordKind, Scheduler};
use hpc_export::{logging, observability};

#[derive(Parser)]
#[command(name = "hpc_export")]
#[command(about = "Normalize and pseudonymize HPC scheduler accounting and inventory into canonical CSV")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ExportArgs {
    /// Scheduler that produced the input (slurm, pbs, lsf, uge, htcondor)
    #[arg(long, value_parser = parse_scheduler)]
    scheduler: Scheduler,
    /// Scheduler output to read; stdin when absent or `-`
    #[arg(long)]
    input: Option<PathBuf>,
    /// CSV destination; stdout when absent or `-`
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit identifying fields as-is
    #[arg(long)]
    no_pseudonymize: bool,
    /// Output column set (defaults to the latest)
    #[arg(long)]
    schema_version: Option<u8>,
    /// Also write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export job accounting records
    Jobs(ExportArgs),
    /// Export node inventory records
    Nodes(ExportArgs),
    /// Print the original value behind a pseudonym
    Reveal {
        pseudonym: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_scheduler(s: &str) -> Result<Scheduler, String> {
    s.parse().map_err(|e| {
        format!(
            "{} (supported: {})",
            e,
            constants::get_supported_schedulers().join(", ")
        )
    })
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input '{}'", path.display())),
        _ => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read input from stdin")?;
            Ok(input)
        }
    }
}

fn export(kind: RecordKind, args: ExportArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(version) = args.schema_version {
        config.output.schema_version = version;
    }
    let input = read_input(args.input.as_deref())?;

    let run_id = Uuid::new_v4();
    let security = FileSecurityLog::new(config.output.security_log.clone(), run_id.to_string());
    let emitter = CsvEmitter::new(config.output.schema_version)?;
    let sink = CsvOutputAdapter::new(args.output.as_deref(), emitter);
    let to_stdout = args.output.as_deref().map_or(true, |p| p == Path::new("-"));

    let mut store = if config.pseudonymize.enabled && !args.no_pseudonymize {
        Some(open_store(&config, &security).context("Failed to open the mapping store")?)
    } else {
        warn!("Pseudonymization disabled; identifying fields are emitted as-is");
        None
    };

    let mut use_case = ExportUseCase::new(&config, Box::new(sink), &security, run_id);
    let summary = use_case.run(args.scheduler, kind, &input, store.as_mut())?;

    if let Some(path) = &args.summary_json {
        fs::write(path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("Failed to write summary '{}'", path.display()))?;
    }
    if let Some(path) = &config.output.metrics_file {
        observability::write_textfile(path)?;
    }
    print_summary(&summary, to_stdout);
    Ok(())
}

/// The summary goes to stdout unless the CSV itself does
fn print_summary(summary: &RunSummary, csv_on_stdout: bool) {
    let text = format!(
        "📊 {} {} export (run {})\n   Parsed: {}\n   Skipped: {}\n   Filtered: {}\n   Rejected: {}\n   Deduplicated: {}\n   Pseudonymized: {}\n   Emitted: {}",
        summary.scheduler,
        summary.kind,
        summary.run_id,
        summary.parsed,
        summary.skipped,
        summary.filtered,
        summary.rejected,
        summary.deduplicated,
        summary.pseudonymized,
        summary.emitted,
    );
    if csv_on_stdout {
        eprintln!("{}", text);
    } else {
        println!("{}", text);
    }
}

fn reveal(pseudonym: &str, config: Option<&Path>) -> Result<()> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let security = FileSecurityLog::new(config.output.security_log.clone(), Uuid::new_v4().to_string());
    let revealed = RevealUseCase::new(&security).reveal(&config.pseudonymize.store_path, pseudonym)?;
    println!("{}", revealed.plaintext);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging();

    if let Err(e) = observability::init() {
        warn!(error = %e, "Metrics disabled");
    }

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Jobs(args) => export(RecordKind::Jobs, args),
        Commands::Nodes(args) => export(RecordKind::Nodes, args),
        Commands::Reveal { pseudonym, config } => reveal(&pseudonym, config.as_deref()),
    };

    match &result {
        Ok(()) => info!("Run completed"),
        Err(e) => error!("Run failed: {:#}", e),
    }
    result
}
