use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Log filter, as a level or a tracing-subscriber directive such as "info,execution=debug".
    #[clap(long = "log.level", env = "LOG_LEVEL", default_value = "info")]
    pub level: String,
    /// Format of logs written to stderr.
    #[clap(long = "log.format", env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub format: LogFormat,
}

pub fn init(args: &LogArgs) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(&args.level)
        .with_context(|| format!("invalid --log.level {:?}", args.level))?;

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false);

    let result = match args.format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|err| anyhow::anyhow!(err))
}
