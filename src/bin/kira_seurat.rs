use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_seurat::annotated::AnnotatedData;
use kira_seurat::config::{ConfigLoader, ConfigOverrides};
use kira_seurat::convert::convert_with_config;
use kira_seurat::domain::{Backend, FormatVersion, GeneColumn, ProjectName};
use kira_seurat::error::ConvertError;
use kira_seurat::input::{read_10x_dir, read_metadata_table};
use kira_seurat::output::{DoctorReport, InspectReport, JsonOutput, TextOutput};
use kira_seurat::rds::load_rds;
use kira_seurat::rscript::RscriptRuntime;

#[derive(Parser)]
#[command(name = "kira-seurat")]
#[command(about = "Convert annotated single-cell matrices into Seurat objects (RDS)")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert a 10x matrix directory into a Seurat RDS file")]
    Convert(ConvertArgs),
    #[command(about = "Summarize the top-level structure of an RDS file")]
    Inspect(InspectArgs),
    #[command(about = "Check the Rscript and SeuratObject installation")]
    Doctor(DoctorArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Directory with matrix.mtx, barcodes.tsv and features.tsv (optionally gzipped).
    input: Utf8PathBuf,

    output: Utf8PathBuf,

    /// Per-cell metadata (CSV or TSV), first column holding the cell ids.
    #[arg(long)]
    metadata: Option<Utf8PathBuf>,

    /// Reorder metadata rows to match the barcode order.
    #[arg(long, requires = "metadata")]
    align_metadata: bool,

    /// Metadata columns to store as factors.
    #[arg(long = "factor", value_name = "COLUMN")]
    factors: Vec<String>,

    #[arg(long, value_enum, default_value_t = GeneColumn::Name)]
    gene_column: GeneColumn,

    #[arg(long, value_enum)]
    backend: Option<Backend>,

    #[arg(long)]
    rscript: Option<PathBuf>,

    #[arg(long)]
    project: Option<ProjectName>,

    #[arg(long)]
    no_compress: bool,

    #[arg(long)]
    format_version: Option<FormatVersion>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct InspectArgs {
    path: Utf8PathBuf,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DoctorArgs {
    #[arg(long)]
    rscript: Option<PathBuf>,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ConvertError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ConvertError) -> u8 {
    match error {
        ConvertError::MissingRuntime(_) | ConvertError::MissingPackage { .. } => 2,
        ConvertError::RuntimeFailed(_) => 3,
        ConvertError::ShapeMismatch { .. }
        | ConvertError::MetadataRowCount { .. }
        | ConvertError::MetadataMisaligned { .. }
        | ConvertError::MetadataColumnLength { .. }
        | ConvertError::InvalidMatrix(_)
        | ConvertError::InvalidInput(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(args) => run_convert(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Doctor(args) => run_doctor(args),
    }
}

fn run_convert(args: ConvertArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?.apply(ConfigOverrides {
        backend: args.backend,
        rscript: args.rscript,
        project: args.project,
        no_compress: args.no_compress,
        format_version: args.format_version,
    });

    let data = read_10x_dir(&args.input, args.gene_column)?;
    let data = match &args.metadata {
        Some(path) => {
            let mut metadata = read_metadata_table(path, &args.factors)?;
            if args.align_metadata {
                metadata = metadata.align_to(data.cell_ids())?;
            }
            data.with_metadata(metadata)?
        }
        None => data,
    };
    info!(
        cells = data.n_cells(),
        genes = data.n_genes(),
        backend = %config.backend,
        "dataset loaded"
    );

    let report = convert_with_config(&data, &args.output, &config)?;
    if args.json {
        JsonOutput::print_report(&report).into_diagnostic()?;
    } else {
        TextOutput::print_report(&report).into_diagnostic()?;
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> miette::Result<()> {
    let object = load_rds(&args.path)?;
    let report = InspectReport::of(args.path.as_str(), &object);
    if args.json {
        JsonOutput::print_inspect(&report).into_diagnostic()?;
    } else {
        TextOutput::print_inspect(&report).into_diagnostic()?;
    }
    Ok(())
}

fn run_doctor(args: DoctorArgs) -> miette::Result<()> {
    let runtime = match args.rscript {
        Some(path) => RscriptRuntime::with_executable(path, ProjectName::default()),
        None => RscriptRuntime::new(ProjectName::default()),
    };
    let (status, checked) = runtime.check_status();
    let report = DoctorReport::new(runtime.tool_info(), status);
    if args.json {
        JsonOutput::print_doctor(&report).into_diagnostic()?;
    } else {
        TextOutput::print_doctor(&report).into_diagnostic()?;
    }
    checked?;
    Ok(())
}
