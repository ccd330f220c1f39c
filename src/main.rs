// greedy-sched - demo driver
// Submits a batch of timed tasks and prints their results as they complete

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use greedy_sched::config::load_config;
use greedy_sched::logging::init_tracing;
use greedy_sched::{Outcome, Scheduler, Task};

#[derive(Parser)]
#[command(name = "greedy-sched")]
#[command(about = "Greedy in-process task scheduler demo", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $GREEDY_SCHED_CONFIG or ~/.greedy-sched/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a batch of tasks and wait for all of them
    Run {
        /// Number of tasks to submit
        #[arg(short, long, default_value_t = 10)]
        tasks: u32,
        /// Spacing between task execution times in milliseconds
        #[arg(short, long, default_value_t = 100)]
        interval_ms: u64,
        /// Make every Nth task fail once before succeeding (0 disables)
        #[arg(long, default_value_t = 0)]
        fail_every: u32,
        /// Delay before a failed task is retried, in milliseconds
        #[arg(long, default_value_t = 250)]
        retry_delay_ms: u64,
    },
    /// Print the resolved configuration
    ShowConfig,
}

/// Task that fails on its first attempt when `flaky` is set.
struct DemoTask {
    id: String,
    execution: DateTime<Utc>,
    retry_delay: chrono::Duration,
    flaky: bool,
    attempts: AtomicU32,
}

#[async_trait]
impl Task for DemoTask {
    type Id = String;
    type Output = String;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn execution_time(&self) -> DateTime<Utc> {
        self.execution
    }

    fn retry_time(&self) -> DateTime<Utc> {
        Utc::now() + self.retry_delay
    }

    async fn execute(&self) -> Outcome<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.flaky && attempt == 1 {
            return Outcome::Failed(anyhow::anyhow!("simulated failure of {}", self.id));
        }
        Outcome::Complete(format!("executed {} (attempt {})", self.id, attempt))
    }
}

/// Milliseconds as a chrono duration, if representable.
fn millis(ms: u64) -> Option<chrono::Duration> {
    i64::try_from(ms).ok().and_then(chrono::Duration::try_milliseconds)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        Commands::Run {
            tasks,
            interval_ms,
            fail_every,
            retry_delay_ms,
        } => {
            let scheduler = Scheduler::with_config(config.scheduler.clone());
            let start = Utc::now();
            let clock = Instant::now();

            let retry_delay = millis(retry_delay_ms)
                .filter(|delay| start.checked_add_signed(*delay).is_some())
                .context("--retry-delay-ms is out of range")?;

            let mut pending = FuturesUnordered::new();
            for i in 0..tasks {
                let offset = interval_ms
                    .checked_mul(u64::from(i))
                    .and_then(millis)
                    .with_context(|| format!("Execution time of task {} is out of range", i))?;
                let execution = start
                    .checked_add_signed(offset)
                    .with_context(|| format!("Execution time of task {} is out of range", i))?;
                let task = DemoTask {
                    id: format!("task-{}", i),
                    execution,
                    retry_delay,
                    flaky: fail_every > 0 && (i + 1) % fail_every == 0,
                    attempts: AtomicU32::new(0),
                };
                let future = scheduler.submit(task);
                pending.push(async move { future.get().await });
            }

            let mut failures = 0;
            while let Some(result) = pending.next().await {
                match result {
                    Ok(message) => println!("[{:>6} ms] {}", clock.elapsed().as_millis(), message),
                    Err(e) => {
                        failures += 1;
                        eprintln!("[{:>6} ms] {}", clock.elapsed().as_millis(), e);
                    }
                }
            }

            scheduler.wait().await;
            scheduler.stop().await;

            if failures > 0 {
                anyhow::bail!("{} of {} tasks failed", failures, tasks);
            }
        }
    }

    Ok(())
}
