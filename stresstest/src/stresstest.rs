//! Run simulated users concurrently against a query engine and print metrics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::time::Instant;
use yansi::Paint;

use crate::poller::QueryPoller;
use crate::queries::QueryMix;
use crate::telemetry::{MetricsKey, RequestMetrics, print_report};
use crate::transport::Transport;

/// A builder for creating a [`Scenario`].
#[derive(Debug)]
pub struct ScenarioBuilder {
    name: String,
    users: usize,
    wait_time: Duration,
    seed: u64,
    mix: QueryMix,
}

impl ScenarioBuilder {
    /// The number of simulated users running poll cycles concurrently.
    pub fn users(mut self, users: usize) -> Self {
        self.users = users.max(1);
        self
    }

    /// The pause between two poll cycles of the same user.
    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// The seed from which every user derives its query generator.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates the scenario instance.
    pub fn build(self) -> Scenario {
        Scenario {
            name: self.name,
            users: self.users,
            wait_time: self.wait_time,
            seed: self.seed,
            mix: Arc::new(self.mix),
        }
    }
}

/// Specification of a load test: how many users submit which queries at which pace.
#[derive(Debug)]
pub struct Scenario {
    /// Name of the scenario for identification in the report.
    pub(crate) name: String,
    pub(crate) users: usize,
    pub(crate) wait_time: Duration,
    pub(crate) seed: u64,
    mix: Arc<QueryMix>,
}

impl Scenario {
    /// Constructs a new scenario builder submitting queries from the given mix.
    pub fn builder(name: impl Into<String>, mix: QueryMix) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            users: available_parallelism().map_or(1, |n| n.get()),
            wait_time: Duration::from_secs(1),
            seed: rand::random(),
            mix,
        }
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// The number of poll cycles executed by all users.
    pub cycles: u64,
    /// Wall time from the start of the first to the end of the last cycle.
    pub elapsed: Duration,
}

/// Runs the scenario against the poller for `duration`.
///
/// Every user executes poll cycles back to back, pausing for the scenario's wait time in between.
/// Once the deadline passes, no new cycles are started. Cycles in flight are allowed to finish, so
/// that every started cycle reports its completion.
pub async fn run<T>(
    poller: Arc<QueryPoller<T>>,
    scenario: &Scenario,
    duration: Duration,
) -> Result<RunSummary>
where
    T: Transport + 'static,
{
    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(format!("Running {}:", scenario.name));
    bar.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let deadline = start + duration;

    let tasks: Vec<_> = (0..scenario.users)
        .map(|user| {
            let poller = Arc::clone(&poller);
            let mix = Arc::clone(&scenario.mix);
            let rng = SmallRng::seed_from_u64(scenario.seed.wrapping_add(user as u64));
            tokio::spawn(run_user(poller, mix, rng, scenario.wait_time, deadline))
        })
        .collect();

    let mut cycles = 0;
    for result in futures::future::join_all(tasks).await {
        cycles += result?;
    }
    bar.finish_and_clear();

    Ok(RunSummary {
        cycles,
        elapsed: start.elapsed(),
    })
}

async fn run_user<T>(
    poller: Arc<QueryPoller<T>>,
    mix: Arc<QueryMix>,
    mut rng: SmallRng,
    wait_time: Duration,
    deadline: Instant,
) -> u64
where
    T: Transport,
{
    let mut cycles = 0;

    // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    while Instant::now() < deadline {
        let (kind, query) = mix.next_query(&mut rng);
        tracing::trace!(%kind, query = %query, "starting poll cycle");
        poller.execute_query(kind.label(), &query).await;
        cycles += 1;

        tokio::select! {
            _ = tokio::time::sleep(wait_time) => {}
            _ = &mut sleep => break,
        }
    }

    cycles
}

/// Prints the report of a finished run.
pub fn print_summary(
    scenario: &Scenario,
    summary: &RunSummary,
    metrics: &BTreeMap<MetricsKey, RequestMetrics>,
) {
    println!();
    println!(
        "{} {} (users: {}, wait time: {:?}, seed: {})",
        "## Scenario".bold(),
        scenario.name.bold().blue(),
        scenario.users.bold(),
        scenario.wait_time,
        scenario.seed,
    );
    println!(
        "{} poll cycles in {:.2?}",
        summary.cycles.bold(),
        summary.elapsed
    );

    print_report(metrics, summary.elapsed);
}
