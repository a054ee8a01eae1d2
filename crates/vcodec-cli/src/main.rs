//! vcodec command-line tool.
//!
//! Commands:
//! - `vcodec inspect <file>` - Decode a stream and print the value
//! - `vcodec canonicalize <in> <out>` - Re-encode a stream in canonical form

use std::fs;
use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vcodec::{decode_with, encode_canonical, DecodeOptions, DefaultCodec, DEFAULT_MAX_DEPTH, MAGIC};
use vcodec_core::Value;

#[derive(Parser)]
#[command(name = "vcodec")]
#[command(about = "Inspect and canonicalize encoded values", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Reject streams without the format header
    #[arg(long, global = true)]
    strict: bool,

    /// Maximum value nesting accepted while decoding
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a file and print the value it holds
    Inspect {
        /// Encoded input file
        file: String,
    },

    /// Decode a file and write its canonical encoding
    Canonicalize {
        /// Encoded input file
        input: String,
        /// Output file
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let options = DecodeOptions {
        allow_legacy: !cli.strict,
        max_depth: cli.max_depth,
    };

    let result = match cli.command {
        Commands::Inspect { file } => cmd_inspect(&file, &options),
        Commands::Canonicalize { input, output } => cmd_canonicalize(&input, &output, &options),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn read_value(
    path: &str,
    options: &DecodeOptions,
) -> Result<(Value, usize), Box<dyn std::error::Error>> {
    let bytes = fs::read(Path::new(path)).map_err(|e| format!("cannot read {}: {}", path, e))?;
    if !bytes.starts_with(MAGIC) {
        info!("{} has no format header", path);
    }
    let value = decode_with(&bytes, &mut DefaultCodec::default(), options)?;
    Ok((value, bytes.len()))
}

/// Print the decoded value with a one-line summary.
fn cmd_inspect(path: &str, options: &DecodeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let (value, size) = read_value(path, options)?;
    println!("{}: {} ({} bytes)", path, value.kind(), size);
    println!("{}", value);
    Ok(())
}

/// Decode `input` and write its canonical encoding to `output`.
fn cmd_canonicalize(
    input: &str,
    output: &str,
    options: &DecodeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (value, size) = read_value(input, options)?;
    let bytes = encode_canonical(&value)?;
    fs::write(Path::new(output), &bytes).map_err(|e| format!("cannot write {}: {}", output, e))?;
    println!("{} -> {} ({} -> {} bytes)", input, output, size, bytes.len());
    Ok(())
}
