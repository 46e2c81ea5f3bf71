//! Command-line interface for reportgen

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use reportgen_core::{Clock, Fingerprint, NewTask, SystemClock, TaskId, TaskStatus};
use reportgen_pipeline::{ControlService, PipelineConfig, Tick, Worker, WorkerGroup};
use reportgen_store::SqliteTaskStore;
use reportgen_utils::LogFormat;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reportgen")]
#[command(version, about = "Queue, generate and review AI-written report content", long_about = None)]
struct Cli {
    /// SQLite database path (defaults to REPORTGEN_DB_PATH or reportgen.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true, env = "REPORTGEN_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a source document for generation
    Enqueue {
        /// Source document (JSON fact sheet)
        document: PathBuf,
        /// Prompt text handed to the provider
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,
        /// Read the prompt from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Use this dedupe key instead of computing one
        #[arg(long)]
        fingerprint: Option<String>,
        /// Template version folded into the computed fingerprint
        #[arg(long, default_value = "v1")]
        template_version: String,
        /// Provider class folded into the computed fingerprint
        #[arg(long, default_value = "default")]
        provider_class: String,
    },
    /// List tasks, oldest first
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Show one task and its response
    Show { id: TaskId },
    /// Show sanitizer audit records for a task or a time range
    Audit {
        #[arg(long, conflicts_with_all = ["since", "until"])]
        task: Option<TaskId>,
        /// RFC 3339 start (default: 24 hours ago)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 end (default: now)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
    /// Provider health and quota
    Providers,
    /// Approve a flagged task
    Approve { id: TaskId },
    /// Replace a flagged task's response with an edited version
    Revise {
        id: TaskId,
        /// File with the edited response
        #[arg(long)]
        file: PathBuf,
    },
    /// Send a finished task back to the queue
    Rerun { id: TaskId },
    /// Put tasks stuck in progress back on the queue
    Recover {
        /// Minimum time since the claim, in seconds
        #[arg(long, default_value_t = 1800)]
        older_than: u64,
    },
    /// Stop workers from claiming tasks
    Pause,
    /// Let workers claim tasks again
    Resume,
    /// Run workers
    Work {
        /// Number of worker loops (default: REPORTGEN_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Process eligible tasks until the queue is empty, then exit
        #[arg(long)]
        once: bool,
    },
}

async fn read_text(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    reportgen_utils::init_tracing_with(cli.log_format, "info");

    let mut config = PipelineConfig::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = Arc::new(
        SqliteTaskStore::open(&config.db_path)
            .with_context(|| format!("failed to open {}", config.db_path.display()))?
            .with_retry_policy(config.retry_policy()),
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = ControlService::from_config(&config, store.clone(), Arc::clone(&clock));

    match cli.command {
        Command::Enqueue {
            document,
            prompt,
            prompt_file,
            fingerprint,
            template_version,
            provider_class,
        } => {
            let payload = match (prompt, prompt_file) {
                (Some(prompt), _) => prompt,
                (None, Some(path)) => read_text(&path).await?,
                (None, None) => bail!("either --prompt or --prompt-file is required"),
            };
            let fingerprint = match fingerprint {
                Some(fingerprint) => Fingerprint::from(fingerprint),
                None => {
                    let mut content = tokio::fs::read(&document)
                        .await
                        .with_context(|| format!("failed to read {}", document.display()))?;
                    content.push(0);
                    content.extend_from_slice(payload.as_bytes());
                    Fingerprint::compute(&content, &template_version, &provider_class)
                }
            };

            let task = service.enqueue(NewTask::new(document, payload, fingerprint)).await?;
            println!("{} queued ({})", task.id, task.fingerprint);
        }
        Command::List { status } => {
            let tasks = service.list(status).await?;
            println!("{}", render::tasks(&tasks));
            println!("{} task(s), {} pending", tasks.len(), service.queue_length().await?);
        }
        Command::Show { id } => {
            let task = service.task(id).await?;
            println!("{}", render::task_detail(&task));
            if let Some(response) = &task.response {
                println!("\n{response}");
            }
        }
        Command::Audit { task, since, until } => {
            let records = match task {
                Some(id) => service.audit_for_task(id).await?,
                None => {
                    let until = until.unwrap_or_else(|| clock.now());
                    let since = since.unwrap_or(until - Duration::hours(24));
                    service.audit_between(since, until).await?
                }
            };
            println!("{}", render::audit(&records));
        }
        Command::Providers => {
            println!("{}", render::providers(&service.providers().await?));
            if service.is_paused().await? {
                println!("claims are paused");
            }
        }
        Command::Approve { id } => {
            let task = service.approve(id).await?;
            println!("{} is {}", task.id, task.status);
        }
        Command::Revise { id, file } => {
            let text = read_text(&file).await?;
            let revision = service.revise(id, &text).await?;
            println!(
                "{} revised: {} correction(s) remaining",
                revision.task.id,
                revision.report.corrections_count()
            );
            if revision.report.corrections_count() > 0 {
                println!("{}", render::audit_notes(&revision.report.notes));
            }
        }
        Command::Rerun { id } => {
            let task = service.rerun(id).await?;
            println!("{} is {} again", task.id, task.status);
        }
        Command::Recover { older_than } => {
            let requeued = service
                .requeue_stale(std::time::Duration::from_secs(older_than))
                .await?;
            if requeued.is_empty() {
                println!("no stale claims");
            } else {
                println!("{}", render::tasks(&requeued));
            }
        }
        Command::Pause => {
            service.pause().await?;
            println!("claims paused");
        }
        Command::Resume => {
            service.resume().await?;
            println!("claims resumed");
        }
        Command::Work { workers, once } => {
            let worker = Worker::from_config(&config, store, clock)?;
            worker.gateway().register().await?;
            let worker = Arc::new(worker);

            if once {
                let mut processed = 0usize;
                while let Tick::Processed(task) = worker.run_once().await? {
                    println!("{} → {}", task.id, task.status);
                    processed += 1;
                }
                info!(processed, "queue drained");
            } else {
                let workers = workers.unwrap_or(config.workers).max(1);
                let group = WorkerGroup::spawn(workers, Arc::clone(&worker));
                info!(workers, "workers running, press Ctrl-C to stop");
                tokio::signal::ctrl_c().await?;
                info!("shutting down, waiting for in-flight tasks");
                group.shutdown_and_join().await;
            }

            println!("{}", serde_json::to_string_pretty(&worker.metrics().snapshot())?);
        }
    }

    Ok(())
}
