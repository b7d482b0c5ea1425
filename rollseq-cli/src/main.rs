//! CLI for the rollseq rollup decoder.
//!
//! Reads a JSON dump of the columns of one rollup row and prints the decoded
//! data points, or how each column would be classified.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use rollseq::codec::{Qualifier, RollupValue};
use rollseq::{
    Aggregator, Column, RollupConfig, RollupDataPoint, RollupInterval, RollupQuery,
    RowAccumulator,
};
use tracing_subscriber::EnvFilter;

/// rollseq: decode pre-aggregated rollup rows.
#[derive(Parser)]
#[command(name = "rollseq", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Decode a row of columns into data points.
    Decode {
        #[command(flatten)]
        row: RowArgs,

        /// Start at the first point at or after this timestamp (seconds or ms).
        #[arg(long)]
        seek: Option<u64>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Show how each column is classified and what it decodes to.
    Inspect {
        #[command(flatten)]
        row: RowArgs,
    },
}

/// Arguments describing the row being read.
#[derive(Args)]
struct RowArgs {
    /// JSON file holding an array of `{row_key, qualifier, value, timestamp}`.
    columns: PathBuf,

    /// Requested aggregation (sum, count, min, max, avg, dev).
    #[arg(long, default_value = "sum")]
    aggregator: String,

    /// Rollup bucket width (e.g., "1m", "1h").
    #[arg(long, default_value = "1h")]
    interval: String,

    /// Time covered by one row (e.g., "1d").
    #[arg(long, default_value = "1d")]
    row_span: String,

    /// Reader configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replace repeated offsets instead of failing.
    #[arg(long)]
    fix_duplicates: bool,
}

impl RowArgs {
    fn accumulator(&self) -> Result<RowAccumulator, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => RollupConfig::load(path)?,
            None => RollupConfig::default(),
        };
        config.fix_duplicates |= self.fix_duplicates;

        let aggregator: Aggregator = self.aggregator.parse()?;
        let interval = RollupInterval::parse(&self.interval, &self.row_span)?;
        let query = RollupQuery::new(aggregator, interval);
        Ok(RowAccumulator::new(&query, &config)?)
    }
}

/// Output format for decoded points.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a `data` array.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decode { row, seek, format } => cmd_decode(&row, seek, &format),
        Commands::Inspect { row } => cmd_inspect(&row),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `rollseq decode <columns.json>`.
fn cmd_decode(
    row: &RowArgs,
    seek: Option<u64>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let columns = read_columns(&row.columns)?;
    let mut acc = row.accumulator()?;
    for column in &columns {
        acc.push_column(column)?;
    }
    tracing::debug!(%acc, "accumulated row");

    let seq = acc.freeze()?;
    let mut iter = seq.iter();
    if let Some(ts) = seek {
        iter.seek(ts);
    }
    let points: Vec<RollupDataPoint> = iter.by_ref().collect();

    match format {
        OutputFormat::Csv => {
            println!(
                "# metric={}, base_time={}, points={}, skipped={}",
                hex(seq.metric_uid()),
                seq.base_time(),
                points.len(),
                iter.skipped_entries()
            );
            println!("timestamp,offset,value,count");
            for dp in &points {
                println!(
                    "{},{},{},{}",
                    dp.timestamp(),
                    dp.offset(),
                    dp.value(),
                    dp.value_count()
                );
            }
        }
        OutputFormat::Json => {
            let data: Vec<serde_json::Value> = points
                .iter()
                .map(|dp| {
                    serde_json::json!({
                        "timestamp": dp.timestamp(),
                        "offset": dp.offset(),
                        "value": json_value(dp.value()),
                        "count": dp.value_count(),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "metric": hex(seq.metric_uid()),
                "base_time": seq.base_time(),
                "aggregator": row.aggregator,
                "count": points.len(),
                "skipped": iter.skipped_entries(),
                "data": data,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `rollseq inspect <columns.json>`.
fn cmd_inspect(row: &RowArgs) -> Result<(), Box<dyn std::error::Error>> {
    let columns = read_columns(&row.columns)?;
    let acc = row.accumulator()?;

    println!("Columns: {}", columns.len());
    for (i, column) in columns.iter().enumerate() {
        println!("  {i}: {}", describe(&acc, column));
    }

    Ok(())
}

/// Describes one column without appending it.
fn describe(acc: &RowAccumulator, column: &Column) -> String {
    let class = match acc.classify(&column.qualifier) {
        Ok(class) => class,
        Err(e) => return format!("qualifier={} {e}", hex(&column.qualifier)),
    };

    let qualifier = match Qualifier::from_bytes(&column.qualifier, class.encoding.field_start()) {
        Ok(q) => q,
        Err(e) => return format!("stream={} {e}", class.stream),
    };

    let value = match RollupValue::decode(&column.value, qualifier) {
        Ok(v) => v.to_string(),
        Err(e) => e.to_string(),
    };

    format!(
        "stream={} encoding={:?} offset={} width={} {} value={value}",
        class.stream,
        class.encoding,
        qualifier.offset(),
        qualifier.width(),
        if qualifier.is_integer() { "integer" } else { "float" },
    )
}

/// Reads a JSON array of columns.
fn read_columns(path: &Path) -> Result<Vec<Column>, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read '{}': {e}", path.display()))?;
    let columns: Vec<Column> = serde_json::from_str(&data)?;
    if columns.is_empty() {
        return Err(format!("no columns in '{}'", path.display()).into());
    }
    Ok(columns)
}

fn json_value(value: RollupValue) -> serde_json::Value {
    match value {
        RollupValue::Integer(v) => serde_json::json!(v),
        RollupValue::Float(v) => serde_json::json!(v),
    }
}

/// Formats bytes as lowercase hex.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
