use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use metamic::config::ExtractConfig;
use metamic::feature::fragment::FragmentSizeDistribution;
use metamic::input::BamSource;
use metamic::output::{Family, FamilyStatus};
use metamic::pipeline::Extractor;

#[derive(Parser)]
#[command(name = "metamic")]
#[command(
    about = "Windowed feature extraction for metagenome assemblies",
    long_about = "Summarises read alignments, pileup and k-mer abundance along assembled contigs into fixed-width window features used to detect mis-assemblies."
)]
struct Cli {
    /// Log verbosity level
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,
    /// Write log output to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,
    /// Append to log file instead of truncating
    #[arg(long, global = true)]
    append_log: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Coordinate-sorted BAM of reads aligned to the contigs.
    #[arg(long, required = true)]
    bam: PathBuf,
    /// Output directory; tables are written under <out-dir>/temp.
    #[arg(long, required = true)]
    out_dir: PathBuf,
    /// Extraction configuration JSON (windows, thresholds, KAD). Defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,
    /// Minimum contig length; overrides the configuration.
    #[arg(long)]
    min_length: Option<usize>,
    /// Worker threads; overrides the configuration.
    #[arg(short, long)]
    threads: Option<usize>,
    /// Samtools-style pileup text. Defaults to <out-dir>/temp/pileup/contigs_pipelup.out.
    #[arg(long)]
    pileup: Option<PathBuf>,
    /// Assembly FASTA used by the KAD family.
    #[arg(long)]
    assemblies: Option<PathBuf>,
    /// Directory of k-mer count dumps. Defaults to <out-dir>/temp/KAD/temp.
    #[arg(long)]
    kmer_dir: Option<PathBuf>,
    /// Recompute families whose output already exists.
    #[arg(short, long)]
    force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every feature family and write the feature matrix
    Extract {
        #[command(flatten)]
        run: RunArgs,
        /// Do not join the family tables into feature_matrix.tsv
        #[arg(long)]
        no_matrix: bool,
    },
    /// Print the fragment size median and MAD as JSON
    Fragment {
        /// Coordinate-sorted BAM of reads aligned to the contigs.
        #[arg(long, required = true)]
        bam: PathBuf,
    },
    /// Pileup base-agreement and coverage features
    Pileup {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Read-pair classification counts
    Reads {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Normalized fragment coverage
    Coverage {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Read breakpoint ratios
    Breakpoints {
        #[command(flatten)]
        run: RunArgs,
    },
    /// K-mer abundance deviation
    Kad {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print JSON Schema for summary.json
    Schema {
        /// Write schema to file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },
}

fn load_config(run: &RunArgs) -> anyhow::Result<ExtractConfig> {
    let mut config = match &run.config {
        Some(path) => ExtractConfig::load(path)?,
        None => ExtractConfig::default(),
    };
    if let Some(min_length) = run.min_length {
        config.min_length = min_length;
    }
    if let Some(threads) = run.threads {
        config.threads = threads;
    }
    config.validate()?;
    Ok(config)
}

fn run_families(run: &RunArgs, families: &[Family], matrix: bool) -> anyhow::Result<bool> {
    let config = load_config(run)?;
    let source = BamSource::open(&run.bam)?;
    let extractor = Extractor::new(&source, &run.out_dir)
        .with_label(run.bam.display().to_string())
        .with_config(config)
        .with_families(families)
        .with_pileup(run.pileup.clone())
        .with_assemblies(run.assemblies.clone())
        .with_kmer_dir(run.kmer_dir.clone())
        .with_feature_matrix(matrix);
    if run.force {
        extractor.layout().clear(families)?;
    }
    let summary = extractor.run()?;

    let mut ok = true;
    for report in &summary.families {
        match report.status {
            FamilyStatus::Failed => {
                ok = false;
                error!(
                    "{} failed: {}",
                    report.family,
                    report.message.as_deref().unwrap_or("unknown error")
                );
            }
            status => info!("{}: {:?} ({} rows)", report.family, status, report.rows.unwrap_or(0)),
        }
    }
    Ok(ok)
}

fn init_logging(cli: &Cli) -> Result<(), String> {
    let mut log_builder = env_logger::Builder::from_default_env();
    log_builder
        .filter_level(cli.log_level.to_level_filter())
        .format_module_path(false);
    if let Some(ref path) = cli.log_file {
        let file = if cli.append_log {
            std::fs::File::options().create(true).append(true).open(path)
        } else {
            std::fs::File::create(path)
        }
        .map_err(|e| format!("Could not open log file '{}': {}", path, e))?;
        log_builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    log_builder.init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(msg) = init_logging(&cli) {
        eprintln!("{}", msg);
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Commands::Extract { run, no_matrix } => run_families(run, &Family::ALL, !no_matrix),
        Commands::Pileup { run } => run_families(run, &[Family::Pileup], false),
        Commands::Reads { run } => run_families(run, &[Family::Reads], false),
        Commands::Coverage { run } => run_families(run, &[Family::Coverage], false),
        Commands::Breakpoints { run } => run_families(run, &[Family::Breakpoints], false),
        Commands::Kad { run } => run_families(run, &[Family::Kad], false),
        Commands::Fragment { bam } => BamSource::open(bam)
            .and_then(|source| FragmentSizeDistribution::from_source(&source))
            .and_then(|dist| Ok(dist.stats()?))
            .and_then(|stats| Ok(serde_json::to_string_pretty(&stats)?))
            .map(|json| {
                println!("{}", json);
                true
            }),
        Commands::Schema { output } => metamic::output::schema::schema_json_pretty()
            .map_err(anyhow::Error::from)
            .and_then(|schema| match output {
                Some(path) => {
                    std::fs::write(path, &schema)?;
                    info!("Schema written to {}", path);
                    Ok(true)
                }
                None => {
                    println!("{}", schema);
                    Ok(true)
                }
            }),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
