use anyhow::Context;
use clap::Parser;
use commands::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod cluster;
mod logging;
mod shell;

/// Interactive shell over an in-process gears cluster.
#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Number of members of the in-process cluster.
    #[clap(long, env = "GEARS_NODES", default_value = "3")]
    nodes: usize,
    /// Path of a JSON Config file. Arguments which follow override its values.
    #[clap(long, env = "GEARS_CONFIG")]
    config: Option<PathBuf>,
    /// Number of executions retained by each member.
    #[clap(long, env = "GEARS_MAX_EXECUTIONS")]
    max_executions: Option<usize>,
    /// Bound on the wait for registration acknowledgements, such as "30s".
    #[clap(long, env = "GEARS_REGISTRATION_ACK_TIMEOUT", value_parser = humantime::parse_duration)]
    registration_ack_timeout: Option<Duration>,
    /// Default bound on blocking result retrievals, such as "1m".
    #[clap(long, env = "GEARS_BLOCKING_TIMEOUT", value_parser = humantime::parse_duration)]
    blocking_timeout: Option<Duration>,

    #[clap(flatten)]
    log: logging::LogArgs,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };

        if let Some(max_executions) = self.max_executions {
            config.max_executions = max_executions;
        }
        if let Some(timeout) = self.registration_ack_timeout {
            config.registration_ack_timeout = timeout;
        }
        if let Some(timeout) = self.blocking_timeout {
            config.blocking_timeout = Some(timeout);
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content =
        std::fs::read(path).with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_slice(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log)?;

    let config = cli.config()?;
    anyhow::ensure!(cli.nodes != 0, "--nodes must be at least one");
    tracing::info!(nodes = cli.nodes, ?config, "starting gears");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(async move {
        let nodes = cluster::start(cli.nodes, &config);
        let result = shell::run(&nodes).await;
        cluster::shutdown(&nodes);
        result
    });

    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}
