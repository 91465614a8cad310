use std::{path::PathBuf, time::Duration};

use blaxel_auth::{
    config::{default_config_path, ConfigSource, Variables},
    Authentication, Settings,
};
use clap::Parser;

#[derive(Debug, Parser)]
struct Opts {
    /// The config file written by the platform CLI
    #[arg(short, long, env = "BLAXEL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ignore the config file and use only environment variables
    #[arg(long, conflicts_with = "config")]
    env_only: bool,

    /// The share of a token's lifetime left when it is refreshed
    #[arg(short = 't', long, default_value_t = 0.5)]
    refresh_threshold: f64,

    /// How long to wait for a token, in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let variables = Variables::from_process();
    let source = match (opts.env_only, opts.config.or_else(default_config_path)) {
        (false, Some(path)) => ConfigSource::Filesystem { variables, path },
        _ => ConfigSource::EnvironmentOnly(variables),
    };

    let settings = Settings::builder(source)
        .refresh_threshold(opts.refresh_threshold)
        .build()?;
    let auth = Authentication::new(settings);

    auth.authenticate_within(Duration::from_secs(opts.timeout)).await?;

    let settings = auth.settings();
    tracing::info!(
        strategy = %settings.strategy(),
        workspace = ?settings.workspace(),
        env = %settings.env(),
        base_url = %settings.base_url(),
        run_url = %settings.run_url(),
        authorized = settings.headers().contains_key(&blaxel_auth::AUTHORIZATION),
        "authenticated"
    );

    Ok(())
}
