//! animcache command line
//!
//! Inspect, verify and generate frame cache files.
//!
//! ```text
//! animcache inspect <file> [--json]
//! animcache verify  <file> --width W --height H
//! animcache synth   --dir D --name N --width W --height H --frames F
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use animcache::cache::format::{self, CacheHeader, FrameIndexEntry};
use animcache::cache::{BuildOutcome, CacheEngine, CacheKey, CacheOptions, CacheRuntime, RuntimeConfig};
use animcache::codec::{FrameBuffer, FrameCodec, Lz4FrameCodec};
use animcache::error::{Error, Result};
use animcache::source::SyntheticSource;

// =============================================================================
// CLI Arguments
// =============================================================================

/// animcache - random-access frame cache tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Runtime configuration file (YAML)
    #[arg(long, env = "ANIMCACHE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and frame index of a cache file
    Inspect {
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a cache file and decode every frame
    Verify {
        file: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,
    },

    /// Build a cache from a synthetic test pattern
    Synth {
        /// Directory that receives the cache file
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Source name used in the cache key
        #[arg(long, default_value = "synthetic")]
        name: String,

        #[arg(long, default_value = "128")]
        width: u32,

        #[arg(long, default_value = "128")]
        height: u32,

        #[arg(long, default_value = "60")]
        frames: usize,

        /// Compression quality (0-100)
        #[arg(long, default_value = "60")]
        quality: u8,

        /// Mark the cache as decoded without a frame limit
        #[arg(long)]
        no_limit: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let runtime = match &args.config {
        Some(path) => {
            info!("Loading runtime config from {}", path.display());
            CacheRuntime::install_global(RuntimeConfig::load(path)?)?
        }
        None => CacheRuntime::global(),
    };

    match args.command {
        Command::Inspect { file, json } => inspect(&file, json),
        Command::Verify {
            file,
            width,
            height,
        } => verify(&file, width, height),
        Command::Synth {
            dir,
            name,
            width,
            height,
            frames,
            quality,
            no_limit,
        } => {
            let key = CacheKey::new(name, width, height, no_limit);
            synth(&dir, key, frames, quality, runtime)
        }
    }
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Serialize)]
struct Inspection<'a> {
    file: &'a Path,
    file_size: u64,
    header: CacheHeader,
    frame_count: usize,
    payload_bytes: u64,
    frames: &'a [FrameIndexEntry],
}

fn inspect(file: &Path, json: bool) -> Result<()> {
    let (header, frames) = format::validate(file)?;
    let report = Inspection {
        file,
        file_size: std::fs::metadata(file)?.len(),
        header,
        frame_count: frames.len(),
        payload_bytes: frames.iter().map(|f| u64::from(f.size)).sum(),
        frames: &frames,
    };

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::Internal(format!("JSON encoding failed: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    println!("file:          {}", report.file.display());
    println!("size:          {} bytes", report.file_size);
    println!("finalized:     {}", report.header.finalized);
    println!("index offset:  {}", report.header.index_offset);
    println!("frames:        {}", report.frame_count);
    println!("payload bytes: {}", report.payload_bytes);
    for frame in report.frames {
        println!("  #{:<5} offset {:<10} size {}", frame.index, frame.offset, frame.size);
    }
    Ok(())
}

fn verify(file: &Path, width: u32, height: u32) -> Result<()> {
    let (_, frames) = format::validate(file)?;
    let raw = std::fs::read(file)?;
    let codec = Lz4FrameCodec::new();
    let mut target = FrameBuffer::new(width, height);

    let mut bad = 0usize;
    for frame in &frames {
        let start = frame.offset as usize;
        let Some(payload) = raw.get(start..start + frame.size as usize) else {
            warn!(frame = frame.index, "Payload runs past end of file");
            bad += 1;
            continue;
        };
        if let Err(e) = codec.decode(payload, &mut target) {
            warn!(frame = frame.index, error = %e, "Frame failed to decode");
            bad += 1;
        }
    }

    if bad > 0 {
        return Err(Error::corrupt(format!("{} of {} frames unreadable", bad, frames.len())));
    }
    info!(frames = frames.len(), "Cache file verified");
    println!("OK: {} frames", frames.len());
    Ok(())
}

fn synth(dir: &Path, key: CacheKey, frames: usize, quality: u8, runtime: Arc<CacheRuntime>) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let started = Instant::now();
    let engine = CacheEngine::with_runtime(
        dir,
        key,
        CacheOptions::with_quality(quality),
        Arc::new(Lz4FrameCodec::new()),
        runtime,
    );

    let outcome = engine.create_cache(&mut SyntheticSource::finite(frames));
    match &outcome {
        BuildOutcome::Generated { frames } => {
            println!(
                "generated {} frames into {} in {} ms",
                frames,
                engine.path().display(),
                started.elapsed().as_millis()
            );
        }
        BuildOutcome::Reused(entries) => {
            println!("reused {} ({} frames)", engine.path().display(), entries.len());
        }
        BuildOutcome::Cancelled | BuildOutcome::Failed => {
            return Err(Error::Internal(format!("cache build for {} did not complete", engine.key())));
        }
    }
    Ok(())
}
