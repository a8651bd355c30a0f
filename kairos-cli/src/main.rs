//! CLI for the kairos time-series storage engine.
//!
//! Provides commands for replaying recorded samples through the engine and
//! benchmarking its write path.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use kairos::{
    ChunkEncoding, DuplicatePolicy, EngineConfig, KairosError, RuleTemplate, SeriesOptions, Store,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// kairos - Chunked in-memory time-series storage engine CLI.
#[derive(Parser)]
#[command(name = "kairos", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Replay `timestamp,value` lines into a series and print the result.
    Replay {
        /// CSV file with one `timestamp_ms,value` sample per line.
        input: PathBuf,

        /// Engine configuration file (JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Key of the replayed series.
        #[arg(long, default_value = "replay")]
        key: String,

        /// Compaction rule as AGGREGATION:BUCKET_MS[:RETENTION_MS]; repeatable.
        #[arg(long = "rule")]
        rules: Vec<RuleTemplate>,

        /// Duplicate policy for the replayed series.
        #[arg(long)]
        policy: Option<DuplicatePolicy>,

        /// Chunk encoding for the replayed series.
        #[arg(long)]
        encoding: Option<ChunkEncoding>,

        /// Retention of the replayed series in milliseconds.
        #[arg(long)]
        retention: Option<u64>,

        /// Start of the printed range, inclusive.
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// End of the printed range, inclusive.
        #[arg(long, default_value_t = u64::MAX)]
        end: u64,

        /// Print newest samples first.
        #[arg(long)]
        reverse: bool,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run a write-path microbenchmark.
    Bench {
        /// Number of data points to write.
        #[arg(long, default_value = "1000000")]
        points: u64,

        /// Write every K-th point into the past (0 disables out-of-order writes).
        #[arg(long, default_value = "0")]
        shuffle_every: u64,

        /// Chunk encoding of the benchmarked series.
        #[arg(long, default_value = "compressed")]
        encoding: ChunkEncoding,
    },
}

/// Output format for replay results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

/// Options of the replay command.
struct ReplayArgs {
    input: PathBuf,
    config: Option<PathBuf>,
    key: String,
    rules: Vec<RuleTemplate>,
    options: SeriesOptions,
    start: u64,
    end: u64,
    reverse: bool,
    format: OutputFormat,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            input,
            config,
            key,
            rules,
            policy,
            encoding,
            retention,
            start,
            end,
            reverse,
            format,
        } => {
            let mut options = SeriesOptions::new();
            options.duplicate_policy = policy;
            options.encoding = encoding;
            options.retention_ms = retention;
            cmd_replay(ReplayArgs {
                input,
                config,
                key,
                rules,
                options,
                start,
                end,
                reverse,
                format,
            })
        }
        Commands::Bench {
            points,
            shuffle_every,
            encoding,
        } => cmd_bench(points, shuffle_every, encoding),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `kairos replay <input>`.
fn cmd_replay(args: ReplayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.compaction_rules.extend(args.rules);

    let mut store = Store::with_config(config)?;
    store.create(&args.key, args.options)?;

    let (written, rejected) = replay_file(&mut store, &args.key, &args.input)?;
    debug!(written, rejected, "replay finished");

    // The replayed series first, then every series derived from it.
    let mut keys = vec![args.key.clone()];
    keys.extend(
        store
            .keys()
            .into_iter()
            .filter(|k| store.get(k).and_then(|s| s.source_key()) == Some(args.key.as_str())),
    );

    match args.format {
        OutputFormat::Csv => {
            for key in &keys {
                let data = store.query(key, args.start, args.end, args.reverse)?.collect_all();
                println!("# series={key}, points={}", data.len());
                println!("timestamp_ms,value");
                for sample in &data {
                    println!("{},{}", sample.timestamp, sample.value);
                }
            }
            println!("# written={written}, rejected={rejected}");
        }
        OutputFormat::Json => {
            let mut series = Vec::with_capacity(keys.len());
            for key in &keys {
                let result = store.query(key, args.start, args.end, args.reverse)?;
                let may_be_incomplete = result.may_be_incomplete();
                let data = result.collect_all();
                series.push(serde_json::json!({
                    "info": store.info(key)?,
                    "may_be_incomplete": may_be_incomplete,
                    "count": data.len(),
                    "data": data,
                }));
            }

            let output = serde_json::json!({
                "written": written,
                "rejected": rejected,
                "series": series,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Streams the samples of `path` into `key`.
///
/// Returns the number of accepted and rejected samples. A first line that
/// does not parse is treated as a header.
fn replay_file(
    store: &mut Store,
    key: &str,
    path: &Path,
) -> Result<(u64, u64), Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("Failed to open '{}': {e}", path.display()))?;

    let mut written = 0;
    let mut rejected = 0;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (timestamp, value) = match parse_sample(line) {
            Ok(sample) => sample,
            Err(_) if idx == 0 => continue,
            Err(e) => return Err(format!("line {}: {e}", idx + 1).into()),
        };

        match store.add(key, timestamp, value) {
            Ok(()) => written += 1,
            Err(e @ (KairosError::Chunk(_) | KairosError::Write(_))) => {
                warn!(line = idx + 1, timestamp, error = %e, "sample rejected");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok((written, rejected))
}

/// Parses a `timestamp,value` line.
fn parse_sample(line: &str) -> Result<(u64, f64), Box<dyn std::error::Error>> {
    let (ts, value) = line
        .split_once(',')
        .ok_or_else(|| format!("expected 'timestamp,value', got '{line}'"))?;
    Ok((ts.trim().parse()?, value.trim().parse()?))
}

/// Implements `kairos bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    points: u64,
    shuffle_every: u64,
    encoding: ChunkEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("kairos write-path benchmark");
    println!("  Points: {points}");
    println!("  Encoding: {encoding}");
    if shuffle_every > 0 {
        println!("  Out-of-order: every {shuffle_every} points");
    }
    println!();

    let mut store = Store::new();
    store.create(
        "bench",
        SeriesOptions::new()
            .with_encoding(encoding)
            .with_duplicate_policy(DuplicatePolicy::Last),
    )?;

    println!("Writing {points} data points...");

    let mut ts = 0u64;
    let start = Instant::now();

    for i in 0..points {
        if shuffle_every > 0 && i > 0 && i % shuffle_every == 0 {
            // Land between existing samples, up to 1000 points back.
            let back = (i * 7_919) % 1_000 + 1;
            store.add("bench", ts.saturating_sub(back * 1_000) + 500, 1.0)?;
        } else {
            ts += 1_000;
            store.add("bench", ts, (i % 100) as f64)?;
        }
    }

    let elapsed = start.elapsed();
    let ns_per_write = elapsed.as_nanos() as f64 / points.max(1) as f64;
    let writes_per_sec = points as f64 / elapsed.as_secs_f64();
    let info = store.info("bench")?;

    println!();
    println!("Results:");
    println!("  Total writes: {points}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/write");
    println!("  Throughput: {writes_per_sec:.0} writes/sec");
    println!("  Samples stored: {}", info.total_samples);
    println!("  Chunks: {}", info.chunk_count);
    println!(
        "  Memory: {} ({:.2} bytes/sample)",
        format_bytes(info.memory_usage),
        info.memory_usage as f64 / info.total_samples.max(1) as f64
    );

    Ok(())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: usize) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        assert_eq!(parse_sample("1000,2.5").unwrap(), (1000, 2.5));
        assert_eq!(parse_sample(" 7 , -1 ").unwrap(), (7, -1.0));
        assert!(parse_sample("timestamp,value").is_err());
        assert!(parse_sample("1000").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }

    #[test]
    fn test_replay_file_counts_rejections() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,value\n100,1\n200,2\n# comment\n200,3\n\n50,4").unwrap();

        let mut store = Store::new();
        store.create("s", SeriesOptions::new()).unwrap();
        let (written, rejected) = replay_file(&mut store, "s", file.path()).unwrap();

        // The default BLOCK policy rejects the second write at 200.
        assert_eq!((written, rejected), (3, 1));
        assert_eq!(store.get("s").unwrap().total_samples(), 3);
    }

    #[test]
    fn test_cli_parses_rules() {
        let cli = Cli::try_parse_from([
            "kairos", "replay", "in.csv", "--rule", "avg:60000", "--rule", "max:3600000:0",
            "--policy", "last",
        ])
        .unwrap();
        let Commands::Replay { rules, policy, .. } = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(rules.len(), 2);
        assert_eq!(policy, Some(DuplicatePolicy::Last));
    }
}
