use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sieve_client::{ReqwestFetcher, SmtpConfig, SmtpNotifier};
use sieve_core::error::AppError;
use sieve_core::job::{Frequency, JobState, NewScheduledJob, ScheduledJob};
use sieve_core::models::{ElementSet, FetchRequest, Strategy};
use sieve_core::orchestrator::{BatchSubmission, Caller, ExecutionMode, Submission, TaskOrchestrator};
use sieve_core::scheduler::JobScheduler;
use sieve_core::strategy::FetchStrategySelector;
use sieve_core::task::TaskStatus;
use sieve_core::traits::{JobStore, Notifier, NullStore, ResultStore};
use sieve_core::SieveConfig;
use sieve_db::{Database, DatabaseConfig, ScheduledJobRepository};

#[cfg(feature = "browser")]
type Browser = sieve_client::ChromeDriver;
#[cfg(not(feature = "browser"))]
type Browser = sieve_core::traits::NoBrowser;

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "sieve", version, about = "Web page fetcher, extractor and scheduler")]
struct Cli {
    /// Identity that owns fetches and scheduled jobs (also the notification recipient)
    #[arg(long, global = true, env = "SIEVE_OWNER", default_value = "local")]
    owner: String,

    /// Rate-limit tier for this caller
    #[arg(long, global = true, env = "SIEVE_TIER", default_value = "default")]
    tier: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page and print the extracted elements as JSON
    Fetch {
        /// Target URL (http:// is assumed when no scheme is given)
        url: String,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Save the result to the database (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /// Fetch several pages on the worker pool and print results keyed by URL
    Batch {
        /// Target URLs
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Maximum pages in flight at once
        #[arg(short, long, default_value_t = 5)]
        concurrency: usize,

        /// Save results to the database (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /// Show saved fetches for the current owner, newest first
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Manage scheduled jobs
    #[command(subcommand)]
    Schedule(ScheduleCommands),

    /// Run the scheduler until interrupted
    Scheduler,
}

#[derive(Args)]
struct ExtractionArgs {
    /// auto, static, or dynamic
    #[arg(short, long, default_value = "auto")]
    strategy: Strategy,

    /// Element kinds to extract (title, headings, text, links, images, tables)
    #[arg(short, long, value_delimiter = ',')]
    elements: Vec<String>,

    /// Custom extraction as NAME=CSS_SELECTOR; replaces --elements
    #[arg(long = "selector", value_parser = parse_selector)]
    selectors: Vec<(String, String)>,
}

impl ExtractionArgs {
    fn element_set(&self) -> Result<ElementSet> {
        if !self.selectors.is_empty() {
            let map: BTreeMap<String, String> = self.selectors.iter().cloned().collect();
            return Ok(ElementSet::Custom(map));
        }
        ElementSet::from_names(&self.elements).map_err(|e| anyhow!(e))
    }
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Create a recurring fetch
    Add {
        url: String,

        /// hourly, daily, weekly, or monthly
        #[arg(short, long)]
        frequency: Frequency,

        /// Time of day in UTC, HH:MM (hourly jobs use only the minute)
        #[arg(short, long, value_parser = parse_time_of_day)]
        at: NaiveTime,

        /// Weekly jobs: 0 = Monday … 6 = Sunday
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=6))]
        weekday: Option<u32>,

        /// Monthly jobs: 1-31, clamped to the month's last day
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=31))]
        day: Option<u32>,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Email the owner after each run
        #[arg(long, default_value_t = false)]
        notify: bool,
    },

    /// List the owner's jobs
    List,

    /// Stop running a job without deleting it
    Pause { id: Uuid },

    /// Re-activate a paused job
    Resume { id: Uuid },

    /// Delete a job and its execution history
    Remove { id: Uuid },

    /// Show recent executions of a job
    Executions {
        id: Uuid,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sieve=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SieveConfig::from_env().context("Invalid SIEVE_* configuration")?;
    let caller = Caller::new(cli.owner, cli.tier);

    match cli.command {
        Commands::Fetch {
            url,
            extraction,
            save,
        } => {
            let request = build_request(&url, &extraction, &config)?;
            if save {
                let db = connect_db().await?;
                cmd_fetch(request, &caller, &config, db.fetch_records()).await?;
            } else {
                cmd_fetch(request, &caller, &config, NullStore).await?;
            }
        }
        Commands::Batch {
            urls,
            extraction,
            concurrency,
            save,
        } => {
            let requests = urls
                .iter()
                .map(|url| build_request(url, &extraction, &config))
                .collect::<Result<Vec<_>>>()?;
            if save {
                let db = connect_db().await?;
                cmd_batch(requests, &caller, &config, concurrency, db.fetch_records()).await?;
            } else {
                cmd_batch(requests, &caller, &config, concurrency, NullStore).await?;
            }
        }
        Commands::History { limit, offset } => {
            let db = connect_db().await?;
            cmd_history(&caller, &config, limit, offset, db.fetch_records()).await?;
        }
        Commands::Schedule(command) => {
            let db = connect_db().await?;
            cmd_schedule(command, &caller.id, &db.scheduled_jobs()).await?;
        }
        Commands::Scheduler => {
            let db = connect_db().await?;
            cmd_scheduler(&config, &db).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow!(e))?;
    Database::open(&config)
        .await
        .context("Failed to open database")
}

fn build_selector(config: &SieveConfig) -> Result<FetchStrategySelector<ReqwestFetcher, Browser>> {
    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    Ok(FetchStrategySelector::new(
        fetcher,
        Browser::default(),
        config.fetch.clone(),
    ))
}

fn build_request(url: &str, extraction: &ExtractionArgs, config: &SieveConfig) -> Result<FetchRequest> {
    let mut request = FetchRequest::new(url)
        .with_strategy(extraction.strategy)
        .with_elements(extraction.element_set()?);
    if let Some(timeout) = config.fetch_timeout {
        request = request.with_timeout(timeout);
    }
    Ok(request)
}

async fn cmd_fetch<S: ResultStore + 'static>(
    request: FetchRequest,
    caller: &Caller,
    config: &SieveConfig,
    store: S,
) -> Result<()> {
    let orchestrator = TaskOrchestrator::new(build_selector(config)?, store, config.orchestrator.clone());

    tracing::info!(url = %request.url, strategy = %request.strategy, "Fetching");
    let Submission::Result(result) = orchestrator
        .submit(request, caller, ExecutionMode::Sync)
        .await
        .map_err(|e| anyhow!(e))?
    else {
        bail!("synchronous fetch returned a task");
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(err) = &result.error {
        bail!("fetch failed: {err}");
    }
    Ok(())
}

async fn cmd_batch<S: ResultStore + 'static>(
    requests: Vec<FetchRequest>,
    caller: &Caller,
    config: &SieveConfig,
    concurrency: usize,
    store: S,
) -> Result<()> {
    let orchestrator = TaskOrchestrator::new(build_selector(config)?, store, config.orchestrator.clone());

    let task = match orchestrator
        .submit_batch(requests, caller, ExecutionMode::Async, concurrency)
        .await
        .map_err(|e| anyhow!(e))?
    {
        BatchSubmission::Task(task) => task,
        BatchSubmission::Results(_) => bail!("asynchronous batch returned inline results"),
    };
    tracing::info!(task_id = %task.id, targets = task.total_count, "Batch submitted");

    let mut reported = 0;
    let task = loop {
        let snapshot = orchestrator.task(task.id, caller).map_err(|e| anyhow!(e))?;
        if snapshot.completed_count != reported {
            reported = snapshot.completed_count;
            tracing::info!(
                completed = snapshot.completed_count,
                total = snapshot.total_count,
                "Batch progress"
            );
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(TASK_POLL_INTERVAL).await;
    };
    orchestrator.evict(task.id);

    println!("{}", serde_json::to_string_pretty(&task.results)?);
    if let Some(err) = &task.error {
        tracing::warn!(error = %err, "Batch finished with errors");
    }
    if task.status == TaskStatus::Error {
        bail!("batch failed");
    }
    Ok(())
}

async fn cmd_history<S: ResultStore + 'static>(
    caller: &Caller,
    config: &SieveConfig,
    limit: usize,
    offset: usize,
    store: S,
) -> Result<()> {
    let orchestrator = TaskOrchestrator::new(build_selector(config)?, store, config.orchestrator.clone());
    let history = orchestrator
        .history(caller, limit, offset)
        .await
        .map_err(|e| anyhow!(e))?;

    if history.is_empty() {
        println!("No fetches found for {}", caller.id);
        return Ok(());
    }

    println!("Fetch history for {}:\n", caller.id);
    for (i, record) in history.iter().enumerate() {
        // Compare with the next older fetch of the same URL on this page.
        let changed = history[i + 1..]
            .iter()
            .find(|older| older.url == record.url)
            .is_none_or(|older| older.data_hash != record.data_hash);
        let marker = if changed { "CHANGED" } else { "unchanged" };

        println!(
            "  [{}] {} {} ({}, {} ms, {}) {}",
            marker,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.url,
            record.strategy,
            record.elapsed_ms,
            record.status.as_str(),
            record.id,
        );
        if let Some(err) = &record.error_message {
            println!("        error: {err}");
        }
    }
    println!("\nTotal: {} fetches", history.len());

    Ok(())
}

async fn cmd_schedule(
    command: ScheduleCommands,
    owner: &str,
    jobs: &ScheduledJobRepository,
) -> Result<()> {
    match command {
        ScheduleCommands::Add {
            url,
            frequency,
            at,
            weekday,
            day,
            extraction,
            notify,
        } => {
            let mut new_job = NewScheduledJob::new(
                owner,
                sieve_core::util::with_default_scheme(&url),
                frequency,
                at,
            )
            .with_strategy(extraction.strategy)
            .with_elements(extraction.element_set()?)
            .with_notify(notify);
            if let Some(weekday) = weekday {
                new_job = new_job.on_weekday(weekday);
            }
            if let Some(day) = day {
                new_job = new_job.on_day_of_month(day);
            }

            sieve_core::util::parse_target(&new_job.url).map_err(|e| anyhow!(e))?;
            let rule = new_job.validate().map_err(|e| anyhow!(e))?;
            let next_run = rule.next_after(Utc::now());
            let job = jobs
                .create_job(&new_job, next_run)
                .await
                .map_err(|e| anyhow!(e))?;

            println!("Created job {} ({rule})", job.id);
            if let Some(next) = job.next_run {
                println!("Next run: {}", next.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        ScheduleCommands::List => {
            let owned = jobs.list_by_owner(owner).await.map_err(|e| anyhow!(e))?;
            if owned.is_empty() {
                println!("No scheduled jobs for {owner}");
                return Ok(());
            }
            for job in &owned {
                let rule = job
                    .rule()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|e| format!("invalid rule: {e}"));
                let next = job
                    .next_run
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  {} [{}] {} {} next: {}{}",
                    job.id,
                    job.status,
                    job.url,
                    rule,
                    next,
                    if job.notify { " (notify)" } else { "" },
                );
            }
        }
        ScheduleCommands::Pause { id } => {
            owned_job(jobs, id, owner).await?;
            jobs.set_status(id, JobState::Paused)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("Paused {id}; a running scheduler drops it at its next reconciliation");
        }
        ScheduleCommands::Resume { id } => {
            owned_job(jobs, id, owner).await?;
            jobs.set_status(id, JobState::Active)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("Resumed {id}");
        }
        ScheduleCommands::Remove { id } => {
            owned_job(jobs, id, owner).await?;
            jobs.delete_job(id).await.map_err(|e| anyhow!(e))?;
            println!("Removed {id}");
        }
        ScheduleCommands::Executions { id, limit } => {
            let job = owned_job(jobs, id, owner).await?;
            let executions = jobs
                .list_executions(id, limit.max(1))
                .await
                .map_err(|e| anyhow!(e))?;
            println!("Executions of {} ({}):\n", job.id, job.url);
            for execution in &executions {
                let detail = match (&execution.result_id, &execution.error_message) {
                    (_, Some(err)) => err.clone(),
                    (Some(result), None) => format!("result {result}"),
                    (None, None) => String::new(),
                };
                println!(
                    "  {} {:<7} {}",
                    execution.executed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    execution.outcome,
                    detail,
                );
            }
            println!("\nTotal: {} executions", executions.len());
        }
    }
    Ok(())
}

async fn owned_job(jobs: &ScheduledJobRepository, id: Uuid, owner: &str) -> Result<ScheduledJob> {
    match jobs.get_job(id).await.map_err(|e| anyhow!(e))? {
        Some(job) if job.owner == owner => Ok(job),
        Some(_) => bail!("job {id} belongs to another owner"),
        None => bail!("job {id} not found"),
    }
}

async fn cmd_scheduler(config: &SieveConfig, db: &Database) -> Result<()> {
    let notifier = match SmtpConfig::from_env().map_err(|e| anyhow!(e))? {
        Some(smtp) => MailNotifier::Smtp(SmtpNotifier::new(&smtp).map_err(|e| anyhow!(e))?),
        None => {
            tracing::warn!("SMTP_HOST/SMTP_FROM not set; job notifications are disabled");
            MailNotifier::Disabled
        }
    };

    let scheduler = Arc::new(JobScheduler::new(
        build_selector(config)?,
        db.fetch_records(),
        db.scheduled_jobs(),
        notifier,
        config.scheduler.clone(),
    ));
    let handle = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    handle.stop().await;
    Ok(())
}

/// Notifier chosen at startup from the SMTP settings.
#[derive(Clone)]
enum MailNotifier {
    Smtp(SmtpNotifier),
    Disabled,
}

impl Notifier for MailNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError> {
        match self {
            MailNotifier::Smtp(smtp) => smtp.notify(recipient, subject, body).await,
            MailNotifier::Disabled => {
                tracing::debug!(recipient, subject, "Notification skipped, SMTP not configured");
                Ok(())
            }
        }
    }
}

fn parse_selector(raw: &str) -> Result<(String, String), String> {
    let (name, css) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SELECTOR, got '{raw}'"))?;
    let (name, css) = (name.trim(), css.trim());
    if name.is_empty() || css.is_empty() {
        return Err(format!("expected NAME=SELECTOR, got '{raw}'"));
    }
    Ok((name.to_string(), css.to_string()))
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| format!("expected HH:MM (UTC), got '{raw}'"))
}
