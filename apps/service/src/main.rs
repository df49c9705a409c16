use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

use pulse_service::alerts::{AlertDispatcher, NotificationService};
use pulse_service::config::Config;
use pulse_service::database::Database;
use pulse_service::monitoring::{MonitoringExecutor, MonitoringScheduler};
use pulse_service::queue::{InMemoryQueue, JetStreamQueue, JobConsumer, JobQueue};
use pulse_service::retention::{RetentionCleanup, RetentionPolicy};
use pulse_service::shutdown::{self, ShutdownSignal};
use pulse_service::worker::{CheckProcessor, Worker};
use pulse_service::{connect_store, seed};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PULSE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations and exit
    Migrate,
    /// Claim due monitors and enqueue check jobs
    Scheduler,
    /// Consume check jobs
    Worker,
    /// Deliver queued alerts
    Dispatcher,
    /// Purge old check history
    Retention {
        /// Run a single cleanup pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Run scheduler, worker, dispatcher and retention in one process
    Run {
        /// Use a process-local queue instead of NATS JetStream
        #[arg(long)]
        in_memory: bool,
    },
    /// Import monitors and alert channels from a TOML file
    Seed { file: PathBuf },
    /// Print the active configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_deref())?;

    match cli.command {
        Command::Config => println!("{config}"),
        Command::Migrate => {
            connect_store(&config).await?;
            tracing::info!("Migrations applied");
        }
        Command::Seed { file } => {
            let database = connect_store(&config).await?;
            let report = seed::apply(database.as_ref(), seed::read(&file)?).await?;
            tracing::info!(
                channels = report.channels,
                monitors = report.monitors,
                subscriptions = report.subscriptions,
                "Seed imported"
            );
        }
        Command::Retention { once: true } => {
            let database = connect_store(&config).await?;
            RetentionCleanup::new(database, RetentionPolicy::from(&config.retention))
                .cleanup_expired(chrono::Utc::now())
                .await?;
        }
        command => run_loops(command, &config).await?,
    }

    Ok(())
}

/// Long-running modes; all of them stop on Ctrl-C or SIGTERM
async fn run_loops(command: Command, config: &Config) -> Result<()> {
    let database = connect_store(config).await?;
    let (sender, signal) = shutdown::channel();
    shutdown::listen_for_signals(sender);

    match command {
        Command::Scheduler => {
            let queue: Arc<dyn JobQueue> = Arc::new(JetStreamQueue::connect(&config.queue).await?);
            scheduler(database, queue, config).run(signal).await;
        }
        Command::Worker => {
            let queue = JetStreamQueue::connect(&config.queue).await?;
            let consumer = Box::new(queue.consumer().await?);
            worker(database, config)?.run(consumer, signal).await;
        }
        Command::Dispatcher => dispatcher(database, config)?.run(signal).await,
        Command::Retention { .. } => retention(database, config).run(signal).await,
        Command::Run { in_memory } => {
            let (queue, consumer): (Arc<dyn JobQueue>, Box<dyn JobConsumer>) = if in_memory {
                tracing::warn!("Using the in-memory queue, jobs are lost on exit");
                let queue = InMemoryQueue::with_max_deliver(config.queue.max_deliver);
                let consumer = Box::new(queue.consumer());
                (Arc::new(queue), consumer)
            } else {
                let queue = JetStreamQueue::connect(&config.queue).await?;
                let consumer = Box::new(queue.consumer().await?);
                (Arc::new(queue), consumer)
            };

            run_all(database, queue, consumer, config, signal).await?;
        }
        Command::Migrate | Command::Seed { .. } | Command::Config => {}
    }

    Ok(())
}

async fn run_all(
    database: Arc<dyn Database>,
    queue: Arc<dyn JobQueue>,
    consumer: Box<dyn JobConsumer>,
    config: &Config,
    signal: ShutdownSignal,
) -> Result<()> {
    let scheduler = scheduler(database.clone(), queue, config);
    let worker = worker(database.clone(), config)?;
    let dispatcher = dispatcher(database.clone(), config)?;
    let retention = retention(database, config);

    tokio::join!(
        scheduler.run(signal.clone()),
        worker.run(consumer, signal.clone()),
        dispatcher.run(signal.clone()),
        retention.run(signal),
    );
    Ok(())
}

fn scheduler(database: Arc<dyn Database>, queue: Arc<dyn JobQueue>, config: &Config) -> MonitoringScheduler {
    MonitoringScheduler::new(database, queue, config.scheduler.clone())
}

fn worker(database: Arc<dyn Database>, config: &Config) -> Result<Worker> {
    let executor = Arc::new(MonitoringExecutor::with_defaults(&config.worker)?);
    Ok(Worker::new(CheckProcessor::new(database, executor), config.queue.max_deliver))
}

fn dispatcher(database: Arc<dyn Database>, config: &Config) -> Result<AlertDispatcher> {
    let notifier = Arc::new(NotificationService::from_config(&config.alerts)?);
    Ok(AlertDispatcher::new(database, notifier, config.alerts.clone()))
}

fn retention(database: Arc<dyn Database>, config: &Config) -> RetentionCleanup {
    RetentionCleanup::new(database, RetentionPolicy::from(&config.retention))
}
