use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oblivkv::config::{DEFAULT_VALUE_SIZE, DEFAULT_WORKERS};
use oblivkv::{Entry, FileCheckpointStore, OblivError, ProtocolConfig, Session};

#[derive(Parser)]
#[command(name = "oblivkv")]
#[command(about = "Client core for an oblivious key/value label protocol")]
#[command(version)]
struct Cli {
    /// Key store checkpoint, loaded at start and saved on success
    #[arg(long, global = true, default_value = "oblivkv.checkpoint.json")]
    checkpoint: PathBuf,

    /// Fixed value width in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_VALUE_SIZE)]
    value_size: usize,

    /// Worker threads per operation
    #[arg(long, global = true, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the initial label table for a value
    Create { key: String, value: String },
    /// Re-key for a read; prints both channel tables
    Get { key: String },
    /// Re-key for a blind overwrite; prints both channel tables
    Put { key: String, value: String },
    /// Decode a hex-encoded raw label table
    Decode { key: String, labels: PathBuf },
    /// Open a Get/Put entry with the prior raw label table
    Resolve { prior: PathBuf, entry: PathBuf },
    /// List keys and recorded lengths
    Keys,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oblivkv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = ProtocolConfig::with_value_size(cli.value_size);
    config.workers = cli.workers;

    let session = Session::open(config, Box::new(FileCheckpointStore::new(cli.checkpoint)))?;
    let mut out = io::stdout().lock();

    match cli.command {
        Commands::Create { key, value } => {
            print_entry(&mut out, &session.create(&key, value.as_bytes())?)?;
        }
        Commands::Get { key } => {
            print_entry(&mut out, &session.get(&key)?)?;
        }
        Commands::Put { key, value } => {
            print_entry(&mut out, &session.put(&key, value.as_bytes())?)?;
        }
        Commands::Decode { key, labels } => {
            let labels = read_hex(&labels)?;
            let value = session.decode(&key, &labels)?;
            out.write_all(&value)?;
            writeln!(out)?;
        }
        Commands::Resolve { prior, entry } => {
            let prior = read_hex(&prior)?;
            let entry = Entry::from_json(&fs::read(&entry)?)?;
            let labels = session.resolve(&prior, &entry)?;
            writeln!(out, "{}", hex::encode(labels))?;
        }
        Commands::Keys => {
            for key in session.store().keys() {
                match session.store().length_of(&key) {
                    Ok(len) => writeln!(out, "{key}\t{len}")?,
                    Err(_) => writeln!(out, "{key}\t-")?,
                }
            }
        }
    }

    session.close()?;
    Ok(())
}

fn print_entry(out: &mut impl Write, entry: &Entry) -> Result<(), OblivError> {
    out.write_all(&entry.to_json()?)?;
    writeln!(out)?;
    Ok(())
}

fn read_hex(path: &Path) -> Result<Vec<u8>, OblivError> {
    let text = fs::read_to_string(path)?;
    hex::decode(text.trim()).map_err(|e| OblivError::Serialization(e.to_string()))
}
