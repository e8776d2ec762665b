use clap::Parser;

use ballista::ProjectConfig;
use ballista::logging;
use ballista::pipeline::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = ProjectConfig::load(&cli.config)?;
    let pipeline = config.pipeline()?;
    pipeline.execute(&cli.command)?;

    Ok(())
}
