use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use yansi::Paint;

use crate::config::Config;
use crate::observability;
use crate::poller::QueryPoller;
use crate::queries::{QueryKind, QueryMix};
use crate::session::SessionHeaders;
use crate::stresstest::{self, Scenario};
use crate::telemetry::{MetricsSink, RecordingSink, TelemetrySink};
use crate::transport::HttpTransport;

/// Load tester for the statement protocol of Trino and Presto.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Once(OnceCommand),
    Version(VersionCommand),
}

/// run simulated users against the configured remote
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// execute a single poll cycle and print every telemetry event
///
/// Useful to verify the configuration and connectivity before a run.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "once")]
struct OnceCommand {
    /// submit a long query instead of a short one
    #[argh(switch)]
    long: bool,

    /// submit this query text instead of a generated one
    #[argh(option, short = 'q')]
    query: Option<String>,
}

/// print the version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::maybe_initialize_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("stresstest-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::initialize_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => run(config).await,
            Command::Once(command) => once(config, command).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

fn make_poller(
    config: &Config,
    sink: Arc<dyn TelemetrySink>,
) -> Result<QueryPoller<HttpTransport>> {
    let transport = HttpTransport::with_timeout(&config.remote, config.request_timeout)?;
    let headers = SessionHeaders::new(&config.session).context("invalid session headers")?;

    Ok(QueryPoller::new(transport, headers, sink).max_fetch_attempts(config.max_fetch_attempts))
}

async fn run(config: Config) -> Result<()> {
    let sink = Arc::new(MetricsSink::new());
    let poller = make_poller(&config, sink.clone())?;
    let mix = QueryMix::new(config.queries.clone()).context("invalid query configuration")?;

    let mut builder = Scenario::builder(config.remote.as_str(), mix)
        .users(config.users)
        .wait_time(config.wait_time);
    if let Some(seed) = config.seed {
        builder = builder.seed(seed);
    }
    let scenario = builder.build();

    tracing::info!(
        remote = %config.remote,
        users = config.users,
        duration = ?config.duration,
        "starting stresstest"
    );
    let summary = stresstest::run(Arc::new(poller), &scenario, config.duration).await?;
    stresstest::print_summary(&scenario, &summary, &sink.take());

    Ok(())
}

async fn once(config: Config, command: OnceCommand) -> Result<()> {
    let sink = Arc::new(RecordingSink::new());
    let poller = make_poller(&config, sink.clone())?;

    let kind = if command.long {
        QueryKind::Long
    } else {
        QueryKind::Short
    };
    let query = match command.query {
        Some(query) => query,
        None => {
            let mix = QueryMix::new(config.queries).context("invalid query configuration")?;
            let mut rng = match config.seed {
                Some(seed) => SmallRng::seed_from_u64(seed),
                None => SmallRng::from_os_rng(),
            };
            mix.query(kind, &mut rng)
        }
    };

    println!("{} {query}", "Submitting:".bold());
    poller.execute_query(kind.label(), &query).await;

    for event in sink.take() {
        let name = format!("{} ({})", event.request_type, event.label);
        match &event.error {
            None => println!(
                "{} {}ms, {} bytes",
                name.bold().green(),
                event.elapsed_millis,
                event.response_size_bytes
            ),
            Some(error) => println!(
                "{} {}ms: {}",
                name.bold().red(),
                event.elapsed_millis,
                error.red()
            ),
        }
    }

    Ok(())
}
