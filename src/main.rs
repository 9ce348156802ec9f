use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use devsim::config::DEFAULT_ENDPOINT;
use devsim::probe::{DEFAULT_TEST_MESSAGE, run_ping, run_send};
use devsim::{Config, ConfigError, Endpoint, ProbeError, RetryPolicy, SessionConfig, run_session};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "devsim")]
#[command(version, about = "Simulated IoT vehicles against a real-time messaging server")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Messaging server endpoint
    #[arg(long, env = "DEVSIM_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// TCP connect timeout in seconds
    #[arg(long, default_value_t = 5, value_parser = parse_seconds, global = true)]
    connect_timeout: u64,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Session length in seconds
    #[arg(default_value_t = 60, value_parser = parse_seconds)]
    duration: u64,

    /// Seconds between telemetry ticks
    #[arg(default_value_t = 2, value_parser = parse_seconds)]
    interval: u64,

    /// Number of simulated devices
    #[arg(long, env = "DEVSIM_DEVICES", default_value_t = 1)]
    devices: usize,

    /// Seconds from a PARK command to auto-park completion
    #[arg(long, default_value_t = 5, value_parser = parse_seconds)]
    park_delay: u64,

    /// Connect attempts before giving up
    #[arg(long, default_value_t = 3)]
    connect_attempts: u32,

    /// Seed for reproducible signal values
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a ping event and wait for pingResponse
    Ping {
        /// Seconds to wait for the response
        #[arg(long, default_value_t = 5, value_parser = parse_seconds)]
        timeout: u64,
    },
    /// Send a single testMessage event
    Send {
        #[arg(default_value = DEFAULT_TEST_MESSAGE)]
        message: String,
    },
}

fn parse_seconds(input: &str) -> Result<u64, String> {
    input
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("{input:?} is not a whole number of seconds"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    devsim::logging::init(if cli.verbose { "debug" } else { "info" });

    let endpoint = match Endpoint::parse(&cli.endpoint) {
        Ok(endpoint) => endpoint,
        Err(err) => return config_failure(&err),
    };
    let connection = Config::new().with_connect_timeout(Duration::from_secs(cli.connect_timeout));

    match cli.command {
        Some(Commands::Ping { timeout }) => {
            match run_ping(&endpoint, &connection, Duration::from_secs(timeout)).await {
                Ok(rtt) => {
                    println!("pingResponse from {endpoint} in {} ms", rtt.as_millis());
                    ExitCode::SUCCESS
                }
                Err(err) => probe_failure(&err),
            }
        }
        Some(Commands::Send { message }) => {
            match run_send(&endpoint, &connection, &message).await {
                Ok(()) => {
                    println!("testMessage {message:?} sent to {endpoint}");
                    ExitCode::SUCCESS
                }
                Err(err) => probe_failure(&err),
            }
        }
        None => simulate(cli.run, endpoint, connection).await,
    }
}

async fn simulate(args: RunArgs, endpoint: Endpoint, connection: Config) -> ExitCode {
    let mut config = SessionConfig::new(endpoint)
        .with_duration(Duration::from_secs(args.duration))
        .with_interval(Duration::from_secs(args.interval))
        .with_devices(args.devices)
        .with_park_delay(Duration::from_secs(args.park_delay))
        .with_retry(RetryPolicy {
            max_attempts: args.connect_attempts,
            ..RetryPolicy::default()
        })
        .with_connection(connection);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
                cancel.cancel();
            }
        }
    });

    let summary = match run_session(config, cancel).await {
        Ok(summary) => summary,
        Err(err) => return config_failure(&err),
    };
    println!("{summary}");
    if let Some(hint) = summary.outcome.hint() {
        eprintln!("hint: {hint}");
    }
    ExitCode::from(summary.exit_code().clamp(0, 255) as u8)
}

fn config_failure(err: &ConfigError) -> ExitCode {
    eprintln!("error: {err}");
    eprintln!("hint: {}", err.usage_hint());
    ExitCode::from(2)
}

fn probe_failure(err: &ProbeError) -> ExitCode {
    eprintln!("error: {err}");
    eprintln!("hint: {}", err.hint());
    ExitCode::FAILURE
}
