use std::{env, path::PathBuf};

use anyhow::Context;
use orchestrator::{configs::RunConfig, train};

const CONFIG_VAR: &str = "ORCHESTRATOR_CONFIG";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path: PathBuf = env::var(CONFIG_VAR)
        .with_context(|| format!("{CONFIG_VAR} must point to a run configuration"))?
        .into();
    let config = RunConfig::read(&path)
        .with_context(|| format!("failed to read the run configuration at {}", path.display()))?;

    let report = train(config)?;
    println!(
        "best checkpoint: {} (validation accuracy {:.4}, {} restarts)",
        report.checkpoint.display(),
        report.validation_accuracy,
        report.restarts
    );

    Ok(())
}
