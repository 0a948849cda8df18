use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use spectral_stacking::config::Config;
use spectral_stacking::pipeline::Pipeline;

/// Stack spectra onto a common wavelength grid.
#[derive(Parser, Debug)]
#[command(name = "spectral-stacking", version, about)]
struct Cli {
    /// TOML configuration file
    config: PathBuf,

    /// Reuse an output directory that holds a previous run
    #[arg(long)]
    overwrite: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    // RUST_LOG wins over the configured level
    let level = config.logging_level()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.to_string().to_lowercase()),
    )
    .init();

    let summary = Pipeline::new(config, cli.overwrite).run()?;
    if let Some(main_stack) = summary.outputs.first() {
        log::info!("main stack written to {}", main_stack.display());
    }
    Ok(())
}
