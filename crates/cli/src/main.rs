// Scaling queue CLI
//
// Design Decision: Use clap derive with env fallbacks, mirroring QueueConfig::from_env.
// Design Decision: The queue runs on its own OS threads; tokio only drives signals and timers.
// Design Decision: Support text/json output so runs can be scripted.

mod demo;
mod output;
mod telemetry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use scaling_queue::{QueueConfig, QueueEventKind, ScalingWorkerQueue};

use demo::DemoSource;
use output::{OutputFormat, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "scaling-queue")]
#[command(about = "Run a scaling worker queue against a synthetic item source")]
#[command(version)]
pub struct Cli {
    /// Queue identifier used in thread names and logs
    #[arg(long, env = "SWQ_QUEUE_ID")]
    pub queue_id: Option<String>,

    /// Dispatcher sleep increment in milliseconds
    #[arg(long, env = "SWQ_DISPATCHER_SLEEP_MS")]
    pub dispatcher_sleep_ms: Option<u64>,

    /// Wait after a fetch that added nothing, in milliseconds
    #[arg(long, env = "SWQ_DISPATCHER_WAIT_ON_EMPTY_FETCH_MS")]
    pub wait_on_empty_fetch_ms: Option<u64>,

    /// Pending items one runner is expected to handle
    #[arg(long, env = "SWQ_ELEMENTS_PER_RUNNER")]
    pub elements_per_runner: Option<usize>,

    /// Lower bound of the quota requested from the supplier
    #[arg(long, env = "SWQ_MIN_ELEMENTS_TO_SUPPLY")]
    pub min_elements_to_supply: Option<usize>,

    /// Items requested beyond what the current runners need
    #[arg(long, env = "SWQ_SPARE_ELEMENTS_TO_SUPPLY")]
    pub spare_elements_to_supply: Option<usize>,

    /// Runners that never retire from idleness
    #[arg(long, env = "SWQ_MIN_RUNNER_COUNT")]
    pub min_runners: Option<usize>,

    /// Upper bound of live runners
    #[arg(long, env = "SWQ_MAX_RUNNER_COUNT")]
    pub max_runners: Option<usize>,

    /// How long an idle runner sleeps before claiming again, in milliseconds
    #[arg(long, env = "SWQ_RUNNER_SLEEP_IDLE_MS")]
    pub runner_sleep_idle_ms: Option<u64>,

    /// Idle time after which ephemeral runners retire, in milliseconds
    #[arg(long, env = "SWQ_RUNNER_MAX_IDLE_MS")]
    pub runner_max_idle_ms: Option<u64>,

    /// Dispatcher sleep periods to back off after a failed fetch cycle
    #[arg(long, env = "SWQ_SLEEP_PERIODS_ON_ERROR")]
    pub sleep_periods_on_error: Option<u32>,

    /// Number of synthetic items served by the supplier
    #[arg(long, default_value = "100")]
    pub items: u64,

    /// Simulated work per item in milliseconds
    #[arg(long, default_value = "50")]
    pub work_ms: u64,

    /// Make every N-th item fail
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub fail_every: Option<u64>,

    /// Stop after this many seconds even if items remain (Ctrl-C stops early)
    #[arg(long)]
    pub run_secs: Option<u64>,

    /// Output format for the final statistics
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,
}

impl Cli {
    /// Queue configuration: `SWQ_*` environment first, explicit flags on top
    pub fn queue_config(&self) -> QueueConfig {
        let mut config = QueueConfig::from_env();
        if let Some(id) = &self.queue_id {
            config = config.with_queue_id(id.clone());
        }
        if let Some(ms) = self.dispatcher_sleep_ms {
            config = config.with_dispatcher_sleep_period(Duration::from_millis(ms));
        }
        if let Some(ms) = self.wait_on_empty_fetch_ms {
            config = config.with_dispatcher_wait_period_on_empty_fetch(Duration::from_millis(ms));
        }
        if let Some(count) = self.elements_per_runner {
            config = config.with_count_of_elements_per_runner(count);
        }
        if let Some(count) = self.min_elements_to_supply {
            config = config.with_min_elements_count_to_supply(count);
        }
        if let Some(count) = self.spare_elements_to_supply {
            config = config.with_spare_elements_count_to_supply(count);
        }
        let min = self.min_runners.unwrap_or(config.min_runner_count);
        let max = self.max_runners.unwrap_or(config.max_runner_count);
        config = config.with_runner_bounds(min, max);
        if let Some(ms) = self.runner_sleep_idle_ms {
            config = config.with_runner_sleep_idle_period(Duration::from_millis(ms));
        }
        if let Some(ms) = self.runner_max_idle_ms {
            config = config.with_runner_max_idle_period(Duration::from_millis(ms));
        }
        if let Some(count) = self.sleep_periods_on_error {
            config = config.with_sleep_period_count_on_error(count);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_logging();

    let config = cli.queue_config();
    let output_format = OutputFormat::from_str(&cli.output);
    tracing::info!(
        queue = %config.queue_id,
        items = cli.items,
        min_runners = config.min_runner_count,
        max_runners = config.max_runner_count,
        "Starting scaling queue"
    );

    let source = Arc::new(DemoSource::new(
        cli.items,
        Duration::from_millis(cli.work_ms),
        cli.fail_every,
    ));
    let supplier = Arc::clone(&source);
    let worker = Arc::clone(&source);
    let queue = Arc::new(
        ScalingWorkerQueue::new(
            config,
            move |quota| Ok(supplier.fetch(quota)),
            move |item: &u64, _config: &QueueConfig| worker.process(*item),
        )
        .context("Failed to create queue")?,
    );
    queue.with_listener(QueueEventKind::AddedToQueue, |item| {
        tracing::trace!(item, "Item queued");
    })?;

    let started = Instant::now();
    queue.start(true).context("Failed to start queue")?;

    let outcome = tokio::select! {
        _ = wait_for_completion(&queue, cli.items) => "completed",
        _ = run_timer(cli.run_secs) => "timed_out",
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            "interrupted"
        }
    };

    let stopping = Arc::clone(&queue);
    tokio::task::spawn_blocking(move || stopping.stop(true))
        .await
        .context("Failed to stop queue")?;

    let summary = RunSummary {
        outcome: outcome.to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: queue.stats(),
    };
    tracing::info!(outcome, elapsed_ms = summary.elapsed_ms, "Queue shutdown complete");
    output_format.print_summary(&summary)
}

/// Resolve once every served item has been handled
async fn wait_for_completion(queue: &ScalingWorkerQueue<u64>, items: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        interval.tick().await;
        let stats = queue.stats();
        if stats.processed + stats.failed + stats.skipped >= items {
            return;
        }
    }
}

async fn run_timer(run_secs: Option<u64>) {
    match run_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "scaling-queue",
            "--queue-id",
            "demo",
            "--dispatcher-sleep-ms",
            "25",
            "--min-runners",
            "2",
            "--max-runners",
            "6",
            "--runner-max-idle-ms",
            "1500",
            "--items",
            "12",
            "--fail-every",
            "3",
            "--output",
            "json",
        ])
        .unwrap();

        let config = cli.queue_config();
        assert_eq!(config.queue_id, "demo");
        assert_eq!(config.dispatcher_sleep_period, Duration::from_millis(25));
        assert_eq!(config.min_runner_count, 2);
        assert_eq!(config.max_runner_count, 6);
        assert_eq!(config.runner_max_idle_period, Duration::from_millis(1500));
        assert_eq!(cli.items, 12);
        assert_eq!(cli.fail_every, Some(3));
        assert_eq!(cli.output, "json");
    }

    #[test]
    fn test_fail_every_rejects_zero() {
        assert!(Cli::try_parse_from(["scaling-queue", "--fail-every", "0"]).is_err());
        assert!(Cli::try_parse_from(["scaling-queue", "--output", "yaml"]).is_err());
    }
}
