use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockcast_core::predict::{ErrorKind, Predictor};

#[derive(Debug, Parser)]
#[command(name = "stockcast", about = "Resolve a KRX stock and print a bounded next-price estimate")]
struct Args {
    /// Six-digit code (e.g. 005930) or a fragment of the stock name.
    query: String,

    /// Calendar days of daily bars to fetch. Overrides STOCKCAST_LOOKBACK_DAYS.
    #[arg(long)]
    lookback_days: Option<i64>,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let mut settings = stockcast_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(days) = args.lookback_days {
        anyhow::ensure!(days >= 1, "--lookback-days must be >= 1 (got {days})");
        settings.lookback_days = days;
    }

    let predictor = Predictor::from_settings(&settings)?;

    let (value, code) = match predictor.run(&args.query).await {
        Ok(result) => (serde_json::to_value(&result)?, ExitCode::SUCCESS),
        Err(err) => {
            let body = serde_json::to_value(err.to_body())?;
            let code = match err.kind() {
                ErrorKind::BadRequest => 2,
                ErrorKind::NotFound => 3,
                ErrorKind::ServerError => 1,
            };
            if err.kind() == ErrorKind::ServerError {
                tracing::error!(query = %args.query, error = %err, "prediction failed");
                sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
            } else {
                tracing::warn!(query = %args.query, error = %err, "prediction rejected");
            }
            (body, ExitCode::from(code))
        }
    };

    println!("{}", render(&value, args.pretty)?);
    Ok(code)
}

fn render(value: &serde_json::Value, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

fn init_sentry(settings: &stockcast_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
