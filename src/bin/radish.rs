//! radish CLI: operator interface to the queue.

use clap::{Parser, Subcommand};
use radish::config::Config;
use radish::enqueue::Enqueuer;
use radish::handler::{JobHandler, log_errors};
use radish::model::{Job, OverwritePolicy};
use radish::monitor::{AllowAll, Monitor};
use radish::redis::{ConnectionRegistry, RedisBackend};
use radish::telemetry::{TelemetryConfig, init_telemetry};
use radish::worker::{Worker, WorkerConfig};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "radish", about = "Redis-coordinated affinity job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker over the given queues
    Serve {
        /// Queues to pull from, in pop-priority order
        #[arg(long, default_value = "default", num_args = 1..)]
        queues: Vec<String>,
        /// Maximum concurrent tasks
        #[arg(long, default_value_t = 4)]
        pool_size: usize,
        /// Affinity ownership TTL in seconds
        #[arg(long, default_value_t = 30)]
        ownership_ttl: u64,
    },
    /// Enqueue one job
    Enqueue {
        /// Target queue
        queue: String,
        /// Unique job id
        job_id: String,
        /// Priority (higher = dequeued sooner)
        #[arg(long, default_value_t = 0)]
        priority: u32,
        /// Affinity key for strict per-key FIFO
        #[arg(long)]
        affinity_key: Option<String>,
        /// Payload bytes (passed through opaque)
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Replace an existing payload under the same job id
        #[arg(long)]
        overwrite: bool,
    },
    /// Queue introspection
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Pending entries per queue
    Depth {
        #[arg(num_args = 1..)]
        queues: Vec<String>,
    },
    /// Per-worker execution counters for one queue
    Counts { queue: String },
    /// Clear the execution counters for one queue
    ResetCounts { queue: String },
}

/// Handler used by `serve`: logs each job. Real deployments embed
/// [`Worker`] as a library with their own handler.
struct LogHandler;

#[async_trait::async_trait]
impl JobHandler for LogHandler {
    async fn handle(&self, job: Job) -> radish::Result<()> {
        tracing::info!(
            job_id = %job.id,
            queue = %job.queue,
            payload_bytes = job.payload.len(),
            "job received"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve {
            queues,
            pool_size,
            ownership_ttl,
        } => cmd_serve(config, queues, pool_size, ownership_ttl).await,
        Command::Enqueue {
            queue,
            job_id,
            priority,
            affinity_key,
            payload,
            overwrite,
        } => {
            cmd_enqueue(
                config,
                queue,
                job_id,
                priority,
                affinity_key,
                payload,
                overwrite,
            )
            .await
        }
        Command::Queue { action } => cmd_queue(config, action).await,
    }
}

async fn backend(config: &Config) -> anyhow::Result<Arc<RedisBackend>> {
    let registry = Arc::new(ConnectionRegistry::new());
    let backend = RedisBackend::connect(registry, config.redis_url.expose_secret()).await?;
    Ok(Arc::new(backend))
}

async fn cmd_serve(
    config: Config,
    queues: Vec<String>,
    pool_size: usize,
    ownership_ttl: u64,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "radish".to_string(),
    })?;

    let registry = Arc::new(ConnectionRegistry::new());
    let mut worker = Worker::connect(
        registry,
        config.redis_url.expose_secret(),
        Arc::new(LogHandler),
        log_errors(),
        WorkerConfig {
            pool_size,
            ownership_ttl: Duration::from_secs(ownership_ttl),
            ..WorkerConfig::default()
        },
    )
    .await?;

    worker.start(queues);
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown requested, draining in-flight work");
    worker.finish().await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_enqueue(
    config: Config,
    queue: String,
    job_id: String,
    priority: u32,
    affinity_key: Option<String>,
    payload: String,
    overwrite: bool,
) -> anyhow::Result<()> {
    let backend = backend(&config).await?;
    let policy = if overwrite {
        OverwritePolicy::Overwrite
    } else {
        OverwritePolicy::IfAbsent
    };

    let existed = Enqueuer::new(backend)
        .enqueue(
            &queue,
            &job_id,
            priority,
            payload.into_bytes(),
            affinity_key.as_deref(),
            policy,
        )
        .await?;

    if existed {
        println!("Enqueued {job_id} (a payload already existed for this id)");
    } else {
        println!("Enqueued {job_id}");
    }
    Ok(())
}

async fn cmd_queue(config: Config, action: QueueAction) -> anyhow::Result<()> {
    let backend = backend(&config).await?;
    match action {
        QueueAction::Depth { queues } => {
            let monitor = Monitor::new(backend, queues, Arc::new(AllowAll));
            let mut depths: Vec<_> = monitor.get_queue_depth().await?.into_iter().collect();
            depths.sort();
            for (queue, depth) in depths {
                println!("{queue:<24} {depth}");
            }
        }
        QueueAction::Counts { queue } => {
            let monitor = Monitor::new(backend, vec![queue.clone()], Arc::new(AllowAll));
            let mut counts: Vec<_> = monitor.get_running_counts(&queue).await?.into_iter().collect();
            counts.sort();
            if counts.is_empty() {
                println!("No execution counters for {queue}.");
            }
            for (worker_id, count) in counts {
                println!("{worker_id:<44} {count}");
            }
        }
        QueueAction::ResetCounts { queue } => {
            let monitor = Monitor::new(backend, vec![queue.clone()], Arc::new(AllowAll));
            monitor.reset_running_counts(&queue).await?;
            println!("Reset execution counters for {queue}.");
        }
    }
    Ok(())
}
