use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use shoresat::config::PipelineConfig;
use shoresat::core::{process_site, CancelToken};
use shoresat::io::output::write_site_outputs;

#[derive(Parser, Debug)]
#[command(name = "shoresat")]
#[command(about = "Satellite-derived shoreline time series for one coastal site")]
#[command(version)]
struct CliArgs {
    /// Site configuration (TOML)
    #[arg(env = "SHORESAT_CONFIG", default_value = "shoresat.toml")]
    config: PathBuf,

    /// Override the output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Process scenes in parallel
    #[arg(long)]
    parallel: bool,

    /// Only count the available scenes per satellite
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CliArgs::parse();

    let mut config = PipelineConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(dir) = args.output {
        config.output.directory = Some(dir);
    }
    if args.parallel {
        config.output.parallel = true;
    }

    let catalog = config.build_catalog().context("Failed to open the scene catalog")?;

    if args.list {
        let counts = catalog.count_by_satellite(&config.region()?, &config.date_range()?, &config.site.satellites)?;
        for (satellite, count) in &counts {
            println!("{}: {} scenes", satellite, count);
        }
        println!("Total: {} scenes", counts.values().sum::<usize>());
        return Ok(());
    }

    let results = process_site(&config, catalog, &CancelToken::new())
        .with_context(|| format!("Processing site {} failed", config.site.name))?;

    let summary = &results.run.summary;
    log::info!(
        "{} of {} scenes processed, {} shorelines kept after post-filtering",
        summary.processed,
        summary.scenes_listed,
        results.run.collection.len()
    );
    for (reason, count) in &summary.discards {
        log::info!("  discarded ({}): {}", reason, count);
    }
    if let Some(reason) = &results.correction_error {
        log::warn!("Tidally corrected series not written: {}", reason);
    }

    let directory = config.output_directory();
    let written = write_site_outputs(
        &results,
        &config.site.name,
        config.extraction.output_epsg,
        config.output.compress,
        &directory,
    )
    .with_context(|| format!("Failed to write outputs to {}", directory.display()))?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}
