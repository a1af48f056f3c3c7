use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ensagg::storage::{DirObjectStore, InstrumentedStore, IoStats, ObjectStore};
use ensagg::{
    AggregationRunner, EnsembleSeed, Error, RunOptions, RuntimeConfig, TableQuery,
    generate_dispatch_info, seed_ensemble,
};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

const DEFAULT_SEGMENT_LENGTH: usize = 1000;

fn parse_positive(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|err| format!("invalid count '{value}': {err}"))?;
    if parsed == 0 {
        return Err("value must be greater than zero".into());
    }
    Ok(parsed)
}

#[derive(Parser)]
#[command(
    name = "ensagg",
    version,
    about = "Aggregate per-realization tables into ensemble statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate one logical table and upload the artifacts.
    Aggregate(AggregateArgs),
    /// Print the aggregation tasks for a whole case as JSON.
    Dispatch(DispatchArgs),
    /// Write a synthetic ensemble into a store.
    Seed(SeedArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Directory of the object store.
    #[arg(long = "store", value_name = "DIR")]
    store: PathBuf,
}

#[derive(Args)]
struct AggregateArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Case uuid.
    #[arg(long = "case", value_name = "UUID")]
    case_uuid: String,
    /// Table name (`data.name`).
    #[arg(long)]
    name: String,
    /// Table tag (`data.tagname`); empty matches any tag.
    #[arg(long = "tag", default_value = "")]
    tagname: String,
    /// Iteration name.
    #[arg(long)]
    iteration: String,
    /// Restrict to tables with this `data.content`.
    #[arg(long)]
    content: Option<String>,
    /// Aggregate only these vectors (comma separated).
    #[arg(long, value_delimiter = ',', value_name = "COLUMNS")]
    columns: Vec<String>,
    /// Also upload the whole unified table.
    #[arg(long = "keep-grand-aggregation")]
    keep_grand_aggregation: bool,
    /// Override ENSAGG_FETCH_CONCURRENCY.
    #[arg(long = "fetch-concurrency", value_parser = parse_positive)]
    fetch_concurrency: Option<usize>,
    /// Override ENSAGG_UPLOAD_CONCURRENCY.
    #[arg(long = "upload-concurrency", value_parser = parse_positive)]
    upload_concurrency: Option<usize>,
}

#[derive(Args)]
struct DispatchArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Case uuid.
    #[arg(long = "case", value_name = "UUID")]
    case_uuid: String,
    /// Vectors per task.
    #[arg(long = "segment-length", default_value_t = DEFAULT_SEGMENT_LENGTH, value_parser = parse_positive)]
    segment_length: usize,
}

#[derive(Args)]
struct SeedArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Case name; the case uuid is derived from it.
    #[arg(long = "case-name")]
    case_name: String,
    /// Number of realizations.
    #[arg(long, value_parser = parse_positive)]
    realizations: usize,
    /// Vectors per realization table (comma separated).
    #[arg(long, value_delimiter = ',', default_value = "FGPT,FOPT,FWPT")]
    vectors: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        tracing::error!("{err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let runtime = Runtime::new()
        .map_err(|e| Error::Internal(format!("failed to create Tokio runtime: {e}")))?;
    match cli.command {
        Command::Aggregate(args) => runtime.block_on(aggregate(args)),
        Command::Dispatch(args) => runtime.block_on(dispatch(args)),
        Command::Seed(args) => runtime.block_on(seed(args)),
    }
}

fn open_store(args: &StoreArgs) -> Result<(Arc<dyn ObjectStore>, Arc<IoStats>), Error> {
    let (store, stats) = InstrumentedStore::new(DirObjectStore::open(&args.store)?);
    Ok((Arc::new(store), stats))
}

#[allow(clippy::print_stdout)]
async fn aggregate(args: AggregateArgs) -> Result<(), Error> {
    let mut config = RuntimeConfig::from_env()?;
    if args.keep_grand_aggregation {
        config.keep_grand_aggregation = true;
    }
    if let Some(n) = args.fetch_concurrency {
        config.fetch_concurrency = n;
    }
    if let Some(n) = args.upload_concurrency {
        config.upload_concurrency = n;
    }

    let (store, stats) = open_store(&args.store)?;
    let mut query = TableQuery::new(args.case_uuid, args.name, args.tagname, args.iteration);
    query.content = args.content;
    let options = RunOptions {
        columns: args.columns,
    };

    let runner = AggregationRunner::new(store, config)?;
    let report = runner.run(&query, &options).await?;
    tracing::info!(io = %stats.snapshot().summary(), "store traffic");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn dispatch(args: DispatchArgs) -> Result<(), Error> {
    let config = RuntimeConfig::from_env()?;
    let (store, _) = open_store(&args.store)?;
    let tasks = generate_dispatch_info(
        store.as_ref(),
        &args.case_uuid,
        args.segment_length,
        config.page_size,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn seed(args: SeedArgs) -> Result<(), Error> {
    let (store, stats) = open_store(&args.store)?;
    let vectors: Vec<&str> = args.vectors.iter().map(String::as_str).collect();
    let seed = EnsembleSeed::new(args.case_name, args.realizations).with_vectors(&vectors);
    let seeded = seed_ensemble(store.as_ref(), &seed).await?;
    tracing::info!(io = %stats.snapshot().summary(), "store traffic");
    println!("{}", seeded.case.uuid);
    Ok(())
}
