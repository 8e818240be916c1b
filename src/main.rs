use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use opclient::{Client, Config, ExecuteOptions, ParallelOperation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "opclient")]
#[command(about = "Run operations against an operation-endpoint data store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/opclient/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Schema to use instead of the configured default
  #[arg(short, long)]
  schema: Option<String>,

  /// Serve reads from the response cache
  #[arg(long)]
  cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a SQL statement
  Sql { statement: String },
  /// Describe a table, or the whole schema when no table is given
  Describe { table: Option<String> },
  /// Run any operation with a JSON object body
  Op {
    operation: String,
    #[arg(default_value = "{}")]
    body: String,
  },
  /// Insert records from a JSON array file in batches
  Import {
    table: String,
    file: PathBuf,
    #[arg(long, default_value_t = opclient::batch::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Groups in flight per wave (default: pool size)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Upsert instead of insert
    #[arg(long)]
    upsert: bool,
  },
  /// Run a JSON array of operations concurrently
  Parallel {
    file: PathBuf,
    #[arg(long)]
    fail_fast: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if args.cache {
    config.cache.enabled = true;
  }

  let client = Client::new(&config)?;
  let client = match args.schema {
    Some(schema) => client.with_schema(schema),
    None => client,
  };

  match args.command {
    Command::Sql { statement } => print(&client.sql(&statement).await?),
    Command::Describe { table: Some(table) } => print(&client.describe_table(&table).await?),
    Command::Describe { table: None } => print(&client.describe_schema(None).await?),
    Command::Op { operation, body } => {
      let body: Map<String, Value> =
        serde_json::from_str(&body).map_err(|e| eyre!("Body must be a JSON object: {}", e))?;
      print(&client.execute(&operation, body, &ExecuteOptions::default()).await?)
    }
    Command::Import {
      table,
      file,
      batch_size,
      concurrency,
      upsert,
    } => {
      let records: Vec<Value> = read_json(&file)?;
      let mut options = client.batch_options().batch_size(batch_size);
      if let Some(c) = concurrency {
        options = options.concurrency(c);
      }
      let result = if upsert {
        client.bulk_upsert(&table, &records, &options).await
      } else {
        client.bulk_insert(&table, &records, &options).await
      };
      print(&result)
    }
    Command::Parallel { file, fail_fast } => {
      let ops: Vec<ParallelOperation> = read_json(&file)?;
      let options = client.parallel_options().fail_fast(fail_fast);
      let result = client.parallel(ops, &options).await.into_result()?;
      print(&result)
    }
  }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents).map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))
}

/// Log to a daily file under the data dir; stdout is reserved for results.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("opclient");

  let appender = tracing_appender::rolling::daily(log_dir, "opclient.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opclient=info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
