use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use jobclaim::admin::AtomicProcessingSwitch;
use jobclaim::config::{ClaimConfig, CoordinatorConfig, ExecutorConfig, StreamConfig};
use jobclaim::node::Node;
use jobclaim::notify::TracingNotificationSink;
use jobclaim::scheduler::{lifecycle, ClaimStrategy, Job, JobState, ScanJobState, WorkItemState};
use jobclaim::shutdown::install_shutdown_handler;
use jobclaim::store::{InMemoryJobStore, JobStore};

#[derive(Parser, Debug)]
#[command(name = "jobclaim")]
#[command(version)]
#[command(about = "Cluster job claiming over a shared store with optimistic locking")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run cooperating instances in-process against one store and execute jobs
    Run(RunArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of instances competing for jobs
    #[arg(long, default_value = "3")]
    instances: usize,

    /// Shell command to submit as a job (repeatable)
    #[arg(long = "job", required = true)]
    jobs: Vec<String>,

    /// Owner recorded on submitted jobs
    #[arg(long, default_value = "cli")]
    owner: String,

    /// Job flavor to run
    #[arg(long, default_value = "scan")]
    flavor: Flavor,

    /// Give up waiting for jobs after this many seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    // === Claim Options ===
    /// Failed claim attempts per tick before giving up
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Upper bound of the random wait after a lost claim (ms)
    #[arg(long, default_value = "300")]
    max_backoff_ms: u64,

    /// Delay between claim ticks (ms)
    #[arg(long, default_value = "200")]
    tick_interval_ms: u64,

    /// Which ready job a tick picks
    #[arg(long, default_value = "oldest-first")]
    strategy: Strategy,

    /// Shell used to run jobs
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Flavor {
    Scan,
    WorkItem,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    OldestFirst,
    OnePerOwner,
}

impl From<Strategy> for ClaimStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::OldestFirst => ClaimStrategy::OldestFirst,
            Strategy::OnePerOwner => ClaimStrategy::OnePerOwner,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobOutput {
    job_id: String,
    owner: String,
    state: String,
    result: String,
    output: String,
    error: String,
    started_at: Option<String>,
    ended_at: Option<String>,
}

impl JobOutput {
    fn from_job<S: JobState>(job: &Job<S>) -> Self {
        Self {
            job_id: job.id.to_string(),
            owner: job.owner.clone(),
            state: job.execution_state.to_string(),
            result: job.execution_result.to_string(),
            output: job.output_stream.clone(),
            error: job.error_stream.clone(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            ended_at: job.ended_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
struct RunOutput {
    instances: usize,
    jobs: Vec<JobOutput>,
    unfinished: usize,
}

// =============================================================================
// Cluster Run
// =============================================================================

async fn run_cluster<S: JobState>(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler(None);
    let store = Arc::new(InMemoryJobStore::<S>::new());
    let switch = Arc::new(AtomicProcessingSwitch::default());
    let notifications = Arc::new(TracingNotificationSink);

    let claim = ClaimConfig {
        max_retries: args.max_retries,
        max_backoff_ms: args.max_backoff_ms,
        tick_interval_ms: args.tick_interval_ms,
        initial_delay_ms: 0,
        strategy: args.strategy.into(),
    };
    let executor = ExecutorConfig {
        shell: args.shell.clone(),
        ..Default::default()
    };

    let mut handles = Vec::with_capacity(args.instances);
    for i in 0..args.instances {
        let config = CoordinatorConfig::new(format!("instance-{}", i + 1))
            .with_claim(claim.clone())
            .with_stream(StreamConfig::default())
            .with_executor(executor.clone());
        let node = Arc::new(Node::new(
            config,
            store.clone(),
            notifications.clone(),
            switch.clone(),
            shutdown.child_token(),
        ));
        handles.push(tokio::spawn(async move {
            if let Err(e) = node.run().await {
                tracing::error!(error = %e, "Node failed");
            }
        }));
    }

    for command in &args.jobs {
        let job = store.create(Job::<S>::new(args.owner.clone(), command.clone())).await?;
        store
            .run_isolated(job.id, Box::new(lifecycle::approve::<S>))
            .await?;
        tracing::info!(job_id = %job.id, command = %command, "Job submitted");
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = poll.tick() => {}
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(timeout_secs = args.timeout_secs, "Timed out waiting for jobs");
                break;
            }
        }
        let jobs = store.all_jobs().await;
        if jobs.iter().all(|j| j.is_terminal()) {
            break;
        }
    }

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Node task panicked");
        }
    }

    let jobs = store.all_jobs().await;
    let unfinished = jobs.iter().filter(|j| !j.is_terminal()).count();
    print_jobs(&args.output, args.instances, &jobs, unfinished)?;
    Ok(())
}

fn print_jobs<S: JobState>(
    output_format: &OutputFormat,
    instances: usize,
    jobs: &[Job<S>],
    unfinished: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = RunOutput {
                instances,
                jobs: jobs.iter().map(JobOutput::from_job).collect(),
                unfinished,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!("{:<38} {:<18} {:<8} OUTPUT", "JOB ID", "STATE", "RESULT");
            println!("{}", "-".repeat(80));
            for job in jobs {
                let output = job.output_stream.trim_end().replace('\n', " | ");
                let output_display = if output.chars().count() > 30 {
                    format!("{}...", output.chars().take(27).collect::<String>())
                } else {
                    output
                };
                println!(
                    "{:<38} {:<18} {:<8} {}",
                    job.id,
                    job.execution_state.to_string(),
                    job.execution_result.to_string(),
                    output_display
                );
            }
            println!();
            println!("{} jobs on {} instances, {} unfinished", jobs.len(), instances, unfinished);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => match run_args.flavor {
            Flavor::Scan => run_cluster::<ScanJobState>(run_args).await?,
            Flavor::WorkItem => run_cluster::<WorkItemState>(run_args).await?,
        },
    }

    Ok(())
}
