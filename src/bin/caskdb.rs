//! A minimal CLI over the `caskdb` library: open a database directory and
//! run a single operation against it. Not a server — every invocation opens
//! the engine, does one thing, and closes it again.

use std::path::PathBuf;

use caskdb::storage::{Engine, IndexType, IteratorOptions, Options};
use caskdb::Result;
use clap::{Parser, Subcommand};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};

/// Layered configuration: an optional TOML file, overridden by CLI flags.
#[derive(Debug, serde::Deserialize, Default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    max_file_size: Option<u64>,
    sync_every_write: Option<bool>,
    bytes_per_sync: Option<u64>,
    mmap_at_startup: Option<bool>,
}

#[derive(Parser, Debug)]
#[command(name = "caskdb", about = "A Bitcask-model key-value store")]
struct Cli {
    /// Path to a TOML config file, merged under any CLI flags given.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the database's segments and keydir live under.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bytes before a segment is rotated.
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Fsync the active segment after every write.
    #[arg(long)]
    sync_every_write: bool,

    /// Use the mmap I/O backend to accelerate the recovery scan on open.
    #[arg(long)]
    mmap_at_startup: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value under a key.
    Put { key: String, value: String },
    /// Fetch the value stored under a key.
    Get { key: String },
    /// Remove a key.
    Delete { key: String },
    /// List every live key, in byte-lexicographic order.
    ListKeys,
    /// Print key/segment/space-reclaim counts.
    Stat,
    /// Compact sealed segments, reclaiming space from superseded records.
    Merge,
}

fn load_options(cli: &Cli) -> Result<Options> {
    let mut file_config = FileConfig::default();
    if let Some(path) = &cli.config {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()))
            .build()
            .map_err(|e| caskdb::Error::InvalidOptions(e.to_string()))?;
        file_config = settings
            .try_deserialize()
            .map_err(|e| caskdb::Error::InvalidOptions(e.to_string()))?;
    }

    let mut options = Options::default();
    if let Some(data_dir) = cli.data_dir.clone().or(file_config.data_dir) {
        options.data_dir = data_dir;
    }
    if let Some(max_file_size) = cli.max_file_size.or(file_config.max_file_size) {
        options.max_file_size = max_file_size;
    }
    options.sync_every_write = cli.sync_every_write || file_config.sync_every_write.unwrap_or(false);
    if let Some(bytes_per_sync) = file_config.bytes_per_sync {
        options.bytes_per_sync = bytes_per_sync;
    }
    options.mmap_at_startup = cli.mmap_at_startup || file_config.mmap_at_startup.unwrap_or(false);
    options.index_type = IndexType::default();
    Ok(options)
}

fn main() -> Result<()> {
    TermLogger::init(
        LevelFilter::Info,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("failed to install terminal logger");

    let cli = Cli::parse();
    let options = load_options(&cli)?;
    let engine = Engine::open(options)?;

    match &cli.command {
        Command::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
        }
        Command::Get { key } => {
            let value = engine.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Command::Delete { key } => {
            engine.delete(key.as_bytes())?;
        }
        Command::ListKeys => {
            let iter = engine.new_iterator(IteratorOptions::default())?;
            while let Some(key) = iter.key() {
                println!("{}", String::from_utf8_lossy(&key));
                iter.next();
            }
        }
        Command::Stat => {
            let stat = engine.stat()?;
            println!("keys:              {}", stat.key_count);
            println!("segments:          {}", stat.segment_count);
            println!("reclaimable bytes: {}", stat.reclaimable_bytes);
            println!("on-disk bytes:     {}", stat.on_disk_bytes);
        }
        Command::Merge => {
            engine.merge()?;
        }
    }

    engine.close()?;
    Ok(())
}
