//! Rasterbatch CLI - concurrent batch raster processing.

use anyhow::{bail, Context, Result};
use rasterbatch::pipeline::StageCategory;
use rasterbatch::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("rasterbatch");

    if args.len() < 2 {
        print_usage(program);
        return Ok(());
    }

    match args[1].as_str() {
        "stages" => {
            list_stages();
            Ok(())
        }
        "process" => {
            if args.len() < 4 {
                eprintln!("Usage: {} process <input> <output> [--pipeline <spec>] [--threads <n>]", program);
                bail!("input and output paths are required");
            }
            process_image(&args[2..])
        }
        "batch" => {
            if args.len() < 4 {
                eprintln!(
                    "Usage: {} batch <input_dir> <output_dir> [--pipeline <spec>] [--config <file>] [--threads <n>] [--report <file>]",
                    program
                );
                bail!("input and output directories are required");
            }
            run_batch(&args[2..])
        }
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(())
        }
        other => {
            print_usage(program);
            bail!("unknown command: {}", other)
        }
    }
}

fn print_usage(program: &str) {
    println!("Rasterbatch v{}", rasterbatch::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  stages                        List all available stages");
    println!("  process <in> <out> [options]  Process a single image");
    println!("  batch <in_dir> <out_dir> [options]  Process every image of a directory");
    println!("  help                          Show this help message");
    println!();
    println!("Options:");
    println!("  --pipeline <spec>   Stage chain, e.g. grayscale,blur:5,adaptive_mean:11:2 (default: otsu)");
    println!("  --config <file>     TOML batch configuration");
    println!("  --threads <n>       Worker threads (default: logical cores)");
    println!("  --report <file>     Write the batch report as JSON");
}

fn list_stages() {
    let registry = StageRegistry::with_builtins();
    println!("Available stages ({} total):", registry.len());
    println!();

    for category in [
        StageCategory::Color,
        StageCategory::Filter,
        StageCategory::Threshold,
        StageCategory::Analysis,
    ] {
        println!("  {}", category.display_name());
        for name in registry.by_category(category) {
            if let Some(entry) = registry.get(name) {
                println!("      {} {} - {}", name, entry.usage, entry.description);
            }
        }
        println!();
    }
}

/// Command-line options shared by `process` and `batch`.
#[derive(Debug, Default)]
struct CliOptions {
    pipeline: Option<String>,
    config: Option<PathBuf>,
    threads: Option<usize>,
    report: Option<PathBuf>,
}

fn parse_options(args: &[String]) -> Result<CliOptions> {
    let mut options = CliOptions::default();
    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--pipeline", Some(v)) => options.pipeline = Some(v.clone()),
            ("--config", Some(v)) => options.config = Some(PathBuf::from(v)),
            ("--threads", Some(v)) => {
                options.threads = Some(v.parse().with_context(|| format!("invalid thread count '{}'", v))?)
            }
            ("--report", Some(v)) => options.report = Some(PathBuf::from(v)),
            (flag, _) => bail!("unknown or incomplete option: {}", flag),
        }
        i += 2;
    }
    Ok(options)
}

fn load_config(options: &CliOptions) -> Result<BatchConfig> {
    let mut config = match &options.config {
        Some(path) => BatchConfig::load(path)?,
        None => BatchConfig::default(),
    };
    if let Some(threads) = options.threads {
        config = config.with_threads(threads);
    }
    Ok(config)
}

fn build_pipeline(options: &CliOptions, config: &BatchConfig) -> Result<Pipeline> {
    let pipeline = match &options.pipeline {
        Some(spec) => Pipeline::parse(spec)?,
        None => config.pipeline()?,
    };
    Ok(pipeline)
}

fn process_image(args: &[String]) -> Result<()> {
    let input = Path::new(&args[0]);
    let output = Path::new(&args[1]);
    let options = parse_options(&args[2..])?;
    let config = load_config(&options)?;
    let pipeline = build_pipeline(&options, &config)?;

    println!("Processing {} -> {} [{}]", input.display(), output.display(), pipeline);
    let started = Instant::now();

    let pool = Arc::new(WorkerPool::new(config.pool_config())?);
    let orchestrator = Arc::new(BatchOrchestrator::new(pool, config.policy(), BatchOptions::default()));
    let service = ImageService::new(Arc::clone(&orchestrator), pipeline);
    service.process_file(input, output)?;
    orchestrator.shutdown(Duration::from_secs(config.drain_timeout_secs));

    println!("Done in {}ms", started.elapsed().as_millis());
    Ok(())
}

fn run_batch(args: &[String]) -> Result<()> {
    let input = PathBuf::from(&args[0]);
    let output = PathBuf::from(&args[1]);
    let options = parse_options(&args[2..])?;
    let config = load_config(&options)?;
    let pipeline = build_pipeline(&options, &config)?;

    let batch_options = config.batch_options()?.with_progress(|update| match update {
        ProgressUpdate::JobCompleted {
            file,
            duration_ms,
            index,
            total,
        } => println!("  [{}/{}] {} ({}ms)", index, total, file, duration_ms),
        ProgressUpdate::JobFailed { file, message } => eprintln!("  failed: {}: {}", file, message),
        _ => {}
    });

    let pool = Arc::new(WorkerPool::new(config.pool_config())?);
    println!("Running batch on {} worker(s)", pool.capacity());
    let orchestrator = Arc::new(BatchOrchestrator::new(pool, config.policy(), batch_options));
    let service = ImageService::new(Arc::clone(&orchestrator), Pipeline::default());

    let ticket = service.start_batch(Some(input), Some(output), pipeline)?;
    println!("{}", ticket.accepted().message);
    let report = ticket.join()?;
    orchestrator.shutdown(Duration::from_secs(config.drain_timeout_secs));

    println!("{}", report);
    if let Some(path) = &options.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("failed to write report to '{}'", path.display()))?;
    }

    if report.timed_out {
        return Err(BatchError::Timeout {
            completed: report.succeeded + report.failed(),
            total: report.total,
        }
        .into());
    }
    Ok(())
}
