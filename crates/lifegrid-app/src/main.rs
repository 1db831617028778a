use anyhow::Result;
use clap::Parser;
use lifegrid_app::{Cli, run};

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(&cli)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
