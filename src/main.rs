use anyhow::Result;
use clap::Parser;
use speed_limiter::config::{Config, LimiterConfig};
use speed_limiter::{Backoff, RetryPolicy, SpeedLimiter, ThrottleError};
use std::process::{ExitCode, ExitStatus};
use std::time::Duration;
use tokio::process::Command;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status used when `--raise` is set and the limit is reached (EX_TEMPFAIL)
const THROTTLED_EXIT_CODE: u8 = 75;

/// The command ran but did not succeed
#[derive(Debug, thiserror::Error)]
#[error("Command exited with {status}")]
struct CommandFailed {
    status: ExitStatus,
}

impl CommandFailed {
    /// Exit code to pass through; 1 when the command died from a signal
    fn exit_code(&self) -> ExitCode {
        self.status
            .code()
            .and_then(|code| u8::try_from(code).ok())
            .map(ExitCode::from)
            .unwrap_or(ExitCode::FAILURE)
    }
}

/// Accepts plain seconds (`1.5`) or a humantime duration (`500ms`, `2s`).
fn parse_sleep(value: &str) -> Result<Duration, String> {
    match value.parse::<f64>() {
        Ok(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("invalid sleep '{}': {}", value, e)),
        Err(_) => humantime_serde::re::humantime::parse_duration(value)
            .map_err(|e| format!("invalid sleep '{}': {}", value, e)),
    }
}

/// Run a command at most LIMIT times per PERIOD seconds across every host
/// sharing the same Redis.
#[derive(Debug, Parser)]
#[command(name = "speed-limiter", version, about)]
struct Args {
    /// Throttle key shared by all cooperating callers
    #[arg(long)]
    key: String,

    /// Executions allowed per window
    #[arg(long)]
    limit: u64,

    /// Window length in seconds
    #[arg(long)]
    period: u64,

    /// Fail with exit code 75 instead of waiting when the limit is reached
    #[arg(long)]
    raise: bool,

    /// Total attempts when the command exits unsuccessfully
    #[arg(long)]
    tries: Option<u32>,

    /// Wait between attempts, in seconds or as a duration such as `500ms`
    #[arg(long, default_value = "1", value_parser = parse_sleep)]
    sleep: Duration,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("speed_limiter={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    tracing::debug!(
        "Configuration: redis_url={}, prefix={}, no_limit={}",
        config.redis_url,
        config.prefix,
        config.no_limit
    );

    let limiter = SpeedLimiter::new(LimiterConfig::from_config(&config)?);
    let mut params = limiter
        .params(args.key.clone(), args.limit, args.period)
        .raise_on_throttled(args.raise);

    if let Some(tries) = args.tries {
        let backoff = if args.sleep.is_zero() {
            Backoff::None
        } else {
            Backoff::Fixed(args.sleep)
        };
        params = params.retry(RetryPolicy::new(tries).backoff(backoff));
    }

    let throttle = params.build()?;
    let (program, program_args) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("No command given"))?;

    let result = throttle
        .call(|state| async move {
            tracing::debug!(state = %state, "Running command");
            let status = Command::new(program).args(program_args).status().await?;
            if status.success() {
                Ok(status)
            } else {
                Err(CommandFailed { status }.into())
            }
        })
        .await;

    match result {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) if err.is_overflow() => {
            eprintln!("{}", err);
            Ok(ExitCode::from(THROTTLED_EXIT_CODE))
        }
        Err(ThrottleError::Operation(err)) => {
            eprintln!("{}", err);
            match err.downcast_ref::<CommandFailed>() {
                Some(failed) => Ok(failed.exit_code()),
                None => Ok(ExitCode::FAILURE),
            }
        }
        Err(err) => Err(err.into()),
    }
}
