use std::path::PathBuf;

use anyhow::Context;
use cgs::app::Application;
use cgs::config::Config;
use clap::Parser;

#[derive(Parser)]
#[command(name = "cgs-server", about = "Dual-transport game protocol server")]
struct Args {
    /// Path to the YAML config file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("loading config")?;
    cgs::logging::init(&config.log).context("initializing logger")?;

    let app = Application::new(config).context("building application")?;
    app.run().context("running server")?;
    Ok(())
}
