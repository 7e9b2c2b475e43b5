/// `nmonimport` -- Import `nmon` capture files into a time-series store
///
/// Run with --help for brief help.
///
/// Quirks
///
/// The importer never re-imports a file whose content has not changed since the last import, and
/// it imports a changed file only from the last row it saw.  This is decided by the checkpoint
/// log, which is keyed by the file's *base name*: two different files with the same name in
/// different directories share a checkpoint.  Use --force to import regardless.
///
/// Points are written as line protocol, to stdout unless --output is given.  Log messages always go
/// to stderr, so stdout can be piped straight into a store's bulk loader.
///
/// Command-line flags override the values from the --config-file.  The tag rules (`inputs`) can
/// only be given in the config file.
mod checkpoints;
mod lineproto;
mod loader;
mod metadata;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use nmonlog::{import_file, read_header, ImportOptions, ImportOutcome};
use nmonutils::ImportConfig;
use std::io;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Import nmon files, writing points and recording checkpoints
    Import(ImportCmdArgs),

    /// Read the headers of nmon files and print the host metadata and schema, without importing
    Metadata(MetadataCmdArgs),
}

#[derive(Args, Debug)]
pub struct ImportCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    header_args: HeaderArgs,

    #[command(flatten)]
    import_args: ImportArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct MetadataCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    header_args: HeaderArgs,

    #[command(flatten)]
    print_args: MetadataPrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// File containing JSON data with importer configuration [default: none]
    #[arg(long)]
    config_file: Option<String>,

    /// nmon files (plain or .gz), and directories to scan for them
    #[arg(required = true)]
    paths: Vec<String>,
}

#[derive(Args, Debug)]
pub struct HeaderArgs {
    /// Time zone of the stamps in the files, an IANA name or +HH:MM [default: local]
    #[arg(long)]
    timezone: Option<String>,

    /// Import the per-CPU series too [default: only the totals]
    #[arg(long, default_value_t = false)]
    cpus: bool,

    /// Skip the disk series [default: import them]
    #[arg(long, default_value_t = false)]
    nodisks: bool,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Import even if the checkpoint says the file is unchanged, and from the beginning
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Comma-separated regular expressions, skip series whose name matches [default: none]
    #[arg(long)]
    skip_metrics: Option<String>,

    /// Checkpoint log [default: $HOME/.nmonimport/checkpoints.jsonl]
    #[arg(long)]
    checkpoint_log: Option<String>,

    /// Append line protocol to this file [default: stdout]
    #[arg(long)]
    output: Option<String>,
}

#[derive(Args, Debug)]
pub struct MetadataPrintArgs {
    /// Print JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
pub struct MetaArgs {
    /// Log debug information to stderr [default: info only, or $RUST_LOG]
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() {
    match nmonimport() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn nmonimport() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            // Same syntax as the other tools: space-separated keyword(value) components, the
            // program name first.
            println!("nmonimport version(0.1.0)");
            Ok(())
        }
        Commands::Import(ref args) => {
            init_logging(&args.meta_args);
            let mut cfg = configure(&args.source_args, &args.header_args)?;
            let import_args = &args.import_args;
            if import_args.force {
                cfg.force = true;
            }
            if let Some(ref s) = import_args.skip_metrics {
                cfg.skip_metrics = s.clone();
            }
            if let Some(ref s) = import_args.checkpoint_log {
                cfg.checkpoint_log = Some(s.clone());
            }
            import(&cfg, &args.source_args.paths, import_args.output.as_deref())
        }
        Commands::Metadata(ref args) => {
            init_logging(&args.meta_args);
            let cfg = configure(&args.source_args, &args.header_args)?;
            print_metadata(&cfg, &args.source_args.paths, &args.print_args)
        }
    }
}

fn init_logging(meta_args: &MetaArgs) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if meta_args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

// The config file, if any, with the command line on top.

fn configure(source_args: &SourceArgs, header_args: &HeaderArgs) -> Result<ImportConfig> {
    let mut cfg = match source_args.config_file {
        Some(ref name) => nmonutils::read_import_config(name)?,
        None => ImportConfig::default(),
    };
    if let Some(ref tz) = header_args.timezone {
        cfg.timezone = tz.clone();
    }
    if header_args.cpus {
        cfg.import_all_cpus = true;
    }
    if header_args.nodisks {
        cfg.skip_disks = true;
    }
    Ok(cfg)
}

fn import(cfg: &ImportConfig, paths: &[String], output: Option<&str>) -> Result<()> {
    // Patterns and the time zone are checked before any file is touched.
    let opts = ImportOptions::from_config(cfg)?;
    let files = loader::expand_paths(paths)?;

    let mut store = match cfg.checkpoint_log {
        Some(ref path) => checkpoints::JsonLinesCheckpoints::open(path)?,
        None => checkpoints::JsonLinesCheckpoints::open(&checkpoints::default_log_path()?)?,
    };
    let mut sink = lineproto::LineProtocolSink::open(output)?;

    for path in files {
        let file = loader::load(&path)?;
        let message = match import_file(&file, &opts, &mut sink, &mut store)? {
            ImportOutcome::Unchanged => {
                format!("file not changed since last import: {}", file.name)
            }
            ImportOutcome::Imported { points, .. } => {
                format!("File {} imported: {} points", file.name, points)
            }
        };
        // Stdout may be carrying the points, in which case the report goes to stderr.
        if output.is_some() {
            println!("{message}");
        } else {
            eprintln!("{message}");
        }
    }
    Ok(())
}

fn print_metadata(
    cfg: &ImportConfig,
    paths: &[String],
    print_args: &MetadataPrintArgs,
) -> Result<()> {
    let opts = ImportOptions::from_config(cfg)?;
    let files = loader::expand_paths(paths)?;
    let mut output = io::stdout();
    for path in files {
        let file = loader::load(&path)?;
        let header = read_header(&file, &opts);
        if print_args.json {
            metadata::print_json(&mut output, &file.name, &header)?;
        } else {
            metadata::print_text(&mut output, &file.name, &header)?;
        }
    }
    Ok(())
}
