//! channel-tasks CLI: run the worker and scheduler, inspect and create tasks.

use std::sync::Arc;

use channel_tasks::backend::{HttpNotificationClient, HttpTrackingClient};
use channel_tasks::config::Config;
use channel_tasks::db::Db;
use channel_tasks::dispatch::Dispatcher;
use channel_tasks::dispatch::pgmq::PgmqBroker;
use channel_tasks::engine::{RevisitScheduler, Worker, WorkerMiddleware};
use channel_tasks::executor::ExecutorTable;
use channel_tasks::model::{Task, TaskId, TaskStatus, TaskType, TrackedChannel};
use channel_tasks::service::TaskService;
use channel_tasks::store::ChannelTrackingStore;
use channel_tasks::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "channel-tasks", about = "Channel tracking task engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the task worker
    Worker {
        /// Maximum concurrent executions (overrides WORKER_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Run the revisit scheduler
    Scheduler,
    /// Run worker and scheduler in one process
    Serve {
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Tracked channel operations
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create and enqueue a task
    Create {
        /// start_tracking | revisit_channel (or 0 | 1)
        task_type: String,
        channel_id: i64,
        /// User to notify when tracking starts
        #[arg(long)]
        notify: Option<i64>,
    },
    /// Show a task
    Show { id: i64 },
    /// List tasks
    List {
        /// Filter by channel
        #[arg(long)]
        channel: Option<i64>,
        /// Filter by status (defaults to pending without --channel)
        #[arg(long)]
        status: Option<String>,
        /// Maximum number of tasks shown, newest first
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum ChannelAction {
    /// List tracked channels
    List,
    /// Stop revisiting a channel
    Pause { channel_id: i64 },
    /// Resume revisiting a channel
    Resume { channel_id: i64 },
}

/// Shared handles built from configuration.
struct App {
    db: Db,
    dispatcher: Arc<Dispatcher>,
    service: Arc<TaskService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Worker { concurrency } => {
            let _guard = telemetry(&config, "channel-tasks-worker")?;
            let app = connect(&config).await?;
            let worker = build_worker(&config, &app, concurrency)?;
            let w = worker.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                w.shutdown();
            });
            worker.run().await?;
            app.dispatcher.close();
            Ok(())
        }
        Command::Scheduler => {
            let _guard = telemetry(&config, "channel-tasks-scheduler")?;
            let app = connect(&config).await?;
            let scheduler = build_scheduler(&config, &app);
            let s = scheduler.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                s.stop();
            });
            scheduler.run().await;
            app.dispatcher.close();
            Ok(())
        }
        Command::Serve { concurrency } => {
            let _guard = telemetry(&config, "channel-tasks")?;
            let app = connect(&config).await?;
            let worker = build_worker(&config, &app, concurrency)?;
            let scheduler = build_scheduler(&config, &app);

            let (w, s) = (worker.clone(), scheduler.clone());
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                w.shutdown();
                s.stop();
            });

            let sched = tokio::spawn(async move { scheduler.run().await });
            worker.run().await?;
            sched.await?;
            app.dispatcher.close();
            Ok(())
        }
        Command::Task { action } => {
            let app = connect(&config).await?;
            match action {
                TaskAction::Create {
                    task_type,
                    channel_id,
                    notify,
                } => cmd_task_create(&app, &task_type, channel_id, notify).await,
                TaskAction::Show { id } => cmd_task_show(&app, id).await,
                TaskAction::List {
                    channel,
                    status,
                    limit,
                } => cmd_task_list(&app, channel, status.as_deref(), limit).await,
            }
        }
        Command::Channel { action } => {
            let app = connect(&config).await?;
            match action {
                ChannelAction::List => cmd_channel_list(&app.db).await,
                ChannelAction::Pause { channel_id } => {
                    cmd_channel_toggle(&app.db, channel_id, false).await
                }
                ChannelAction::Resume { channel_id } => {
                    cmd_channel_toggle(&app.db, channel_id, true).await
                }
            }
        }
    }
}

fn telemetry(config: &Config, service_name: &str) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: service_name.to_string(),
        default_filter: config.log_level.clone(),
    })?)
}

async fn connect(config: &Config) -> anyhow::Result<App> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.health_check().await?;

    let broker = Arc::new(PgmqBroker::new(db.clone()));
    let dispatcher = Arc::new(Dispatcher::open(broker, config.dispatcher()).await?);
    let service = Arc::new(TaskService::new(
        Arc::new(db.clone()),
        Arc::clone(&dispatcher),
    ));
    Ok(App {
        db,
        dispatcher,
        service,
    })
}

fn build_worker(config: &Config, app: &App, concurrency: Option<usize>) -> anyhow::Result<Worker> {
    let tracking = HttpTrackingClient::new(&config.tracking_service_url, config.backend_timeout())?;
    let notifier =
        HttpNotificationClient::new(&config.notification_service_url, config.backend_timeout())?;

    let store = Arc::new(app.db.clone());
    let middleware = WorkerMiddleware::new(store.clone(), store, Some(Arc::new(notifier)));

    let mut worker_config = config.worker();
    if let Some(n) = concurrency {
        worker_config.max_concurrent = n;
    }

    Ok(Worker::new(
        Arc::clone(&app.dispatcher),
        Arc::new(middleware),
        Arc::new(ExecutorTable::with_tracking_backend(Arc::new(tracking))),
        worker_config,
    ))
}

fn build_scheduler(config: &Config, app: &App) -> RevisitScheduler {
    RevisitScheduler::new(
        Arc::new(app.db.clone()),
        Arc::clone(&app.service),
        config.scheduler(),
    )
}

async fn cmd_task_create(
    app: &App,
    task_type: &str,
    channel_id: i64,
    notify: Option<i64>,
) -> anyhow::Result<()> {
    let task_type = match task_type.parse::<i32>() {
        Ok(code) => TaskType::try_from(code)?,
        Err(_) => task_type.parse::<TaskType>()?,
    };
    let (task, error) = app.service.create_task(task_type, channel_id, notify).await?;
    match error {
        None => println!("Created: task {} (status: {})", task.id, task.status),
        Some(error) => {
            println!("Not queued: task {} (status: {})", task.id, task.status);
            anyhow::bail!(error);
        }
    }
    Ok(())
}

async fn cmd_task_show(app: &App, id: i64) -> anyhow::Result<()> {
    let task = app
        .service
        .get_task(TaskId(id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no task with id {id}"))?;

    println!("ID:          {}", task.id);
    println!("Type:        {}", task.task_type);
    println!("Channel:     {}", task.channel_id);
    println!("Status:      {}", task.status);
    println!("Message ID:  {}", task.message_id);
    println!("Created:     {}", task.created_at);
    if let Some(started) = task.started_at {
        println!("Started:     {started}");
    }
    if let Some(completed) = task.completed_at {
        println!("Completed:   {completed}");
    }
    if let Some(user) = task.user_id_to_notify {
        println!("Notify:      {user}");
    }
    if let Some(ref err) = task.error_message {
        println!("Error:       {err}");
    }
    Ok(())
}

async fn cmd_task_list(
    app: &App,
    channel: Option<i64>,
    status: Option<&str>,
    limit: i64,
) -> anyhow::Result<()> {
    let status = status.map(str::parse::<TaskStatus>).transpose()?;
    let tasks = match channel {
        Some(channel_id) => {
            let tasks = app.service.get_channel_tasks(channel_id).await?;
            select_channel_tasks(tasks, status, limit)
        }
        None => {
            app.service
                .get_tasks_by_status(status.unwrap_or(TaskStatus::Pending), limit)
                .await?
        }
    };
    print_tasks(&tasks);
    Ok(())
}

/// Apply the status filter and limit to a channel's tasks (oldest first),
/// returning the newest matches first.
fn select_channel_tasks(tasks: Vec<Task>, status: Option<TaskStatus>, limit: i64) -> Vec<Task> {
    tasks
        .into_iter()
        .rev()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .take(limit.max(0) as usize)
        .collect()
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<8}  {:<16}  {:<12}  {:<10}  CREATED",
        "ID", "TYPE", "CHANNEL", "STATUS"
    );
    println!("{}", "-".repeat(72));
    for task in tasks {
        println!(
            "{:<8}  {:<16}  {:<12}  {:<10}  {}",
            task.id,
            task.task_type,
            task.channel_id,
            task.status,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} task(s)", tasks.len());
}

async fn cmd_channel_list(db: &Db) -> anyhow::Result<()> {
    let channels = ChannelTrackingStore::list(db).await?;
    if channels.is_empty() {
        println!("No tracked channels.");
        return Ok(());
    }

    println!("{:<12}  {:<10}  LAST REVISITED", "CHANNEL", "REVISITING");
    println!("{}", "-".repeat(48));
    for channel in &channels {
        print_channel(channel);
    }
    println!("\n{} channel(s)", channels.len());
    Ok(())
}

fn print_channel(channel: &TrackedChannel) {
    println!(
        "{:<12}  {:<10}  {}",
        channel.channel_id,
        channel.revisiting,
        channel
            .last_revisited
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    );
}

async fn cmd_channel_toggle(db: &Db, channel_id: i64, revisiting: bool) -> anyhow::Result<()> {
    match db.set_revisiting(channel_id, revisiting).await? {
        Some(channel) => print_channel(&channel),
        None => anyhow::bail!("channel {channel_id} is not tracked"),
    }
    Ok(())
}
