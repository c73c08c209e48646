//! errand - ordered automation task queue.
//!
//! Usage:
//!   errand add <target> <query>   Add a task to the end of the queue
//!   errand list                   Show the queue in run order
//!   errand run                    Run every pending task, one at a time
//!   errand history                Show the history log

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use errand_core::app::{AppBuilder, Errand};
use errand_core::config::ErrandConfig;
use errand_core::domain::{DomainEvent, NewTask, TaskId, TaskPatch};
use errand_core::impls::{
    CommandExecutor, HistoryEntry, HistoryLog, InMemoryBackend, JsonFileBackend, ScriptedExecutor,
};
use errand_core::ports::{Executor, PersistenceBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// errand - run browser-automation errands in order
#[derive(Parser)]
#[command(name = "errand")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./errand.toml, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep tasks in memory only; nothing is read from or written to disk
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Echo tasks instead of calling the configured executor
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks in run order
    List,

    /// Add a task to the end of the queue
    Add {
        /// Site the agent operates on
        target: String,
        /// Instruction for the agent
        query: String,
        /// Executor invocations per run
        #[arg(long = "loops", default_value = "1")]
        loops: u32,
    },

    /// Edit a task's fields
    Edit {
        id: TaskId,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long = "loops")]
        loops: Option<u32>,
    },

    /// Remove a task
    Remove { id: TaskId },

    /// Move SOURCE into TARGET's position
    Move { source: TaskId, target: TaskId },

    /// Reset finished tasks to pending (all of them when no id is given)
    Reset { id: Option<TaskId> },

    /// Run every pending task in order. Ctrl-C stops after the current task.
    Run,

    /// Show recorded results of a task
    Results { id: TaskId },

    /// Show the history log
    History {
        /// Newest N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Only entries of this category (task, execution, run)
        #[arg(long)]
        category: Option<String>,
        /// Case-insensitive keyword search
        #[arg(long)]
        search: Option<String>,
    },

    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = dispatch(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    if let Commands::Config = cli.command {
        print!("{}", ErrandConfig::default_config_string());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => ErrandConfig::from_file(path)?,
        None => ErrandConfig::load()?,
    };

    let history = if cli.ephemeral {
        None
    } else {
        Some(Arc::new(HistoryLog::open(&config.storage.history_file).await))
    };

    match cli.command {
        Commands::Results { id } => return show_results(history.as_deref(), id).await,
        Commands::History {
            limit,
            category,
            search,
        } => return show_history(history.as_deref(), limit, category, search).await,
        _ => {}
    }

    let errand = open(&cli, &config, history.clone())?;
    errand.init().await?;

    match cli.command {
        Commands::List => list(&errand).await?,
        Commands::Add {
            target,
            query,
            loops,
        } => {
            let task = errand
                .add(NewTask::new(target, query).with_loop_count(loops))
                .await?;
            println!("added {}", task.id);
        }
        Commands::Edit {
            id,
            target,
            query,
            loops,
        } => {
            let patch = TaskPatch {
                target,
                query,
                loop_count: loops,
            };
            if patch.is_empty() {
                return Err("nothing to edit: pass --target, --query or --loops".into());
            }
            let task = errand.update(id, &patch).await?;
            println!("updated {}", task.id);
        }
        Commands::Remove { id } => {
            errand.delete(id).await?;
            println!("removed {id}");
        }
        Commands::Move { source, target } => {
            errand.move_task(source, target).await?;
            list(&errand).await?;
        }
        Commands::Reset { id } => {
            let count = match id {
                Some(id) => usize::from(errand.reset(id).await?),
                None => errand.reset_all().await?.len(),
            };
            println!("reset {count} task(s)");
        }
        Commands::Run => run(&errand).await?,
        Commands::Results { .. } | Commands::History { .. } | Commands::Config => {}
    }

    Ok(())
}

fn open(cli: &Cli, config: &ErrandConfig, history: Option<Arc<HistoryLog>>) -> CliResult<Errand> {
    let backend: Arc<dyn PersistenceBackend> = if cli.ephemeral {
        Arc::new(InMemoryBackend::new())
    } else {
        Arc::new(JsonFileBackend::new(&config.storage.data_file))
    };

    let executor: Arc<dyn Executor> = match CommandExecutor::from_config(&config.executor) {
        Some(command) if !cli.dry_run => Arc::new(command),
        None if !cli.dry_run && matches!(cli.command, Commands::Run) => {
            return Err(
                "no executor configured: set [executor] program in errand.toml or pass --dry-run"
                    .into(),
            );
        }
        _ => Arc::new(ScriptedExecutor::new()),
    };

    let mut builder = AppBuilder::new(backend, executor).config(config.clone());
    if let Some(history) = history {
        builder = builder.event_sink(history);
    }
    Ok(builder.build()?)
}

async fn list(errand: &Errand) -> CliResult<()> {
    let tasks = errand.tasks().await?;
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for (position, task) in tasks.iter().enumerate() {
        println!(
            "{:>3}  {}  {:<9}  x{}  {}  {}",
            position + 1,
            task.id,
            task.status,
            task.loop_count,
            task.target,
            task.query
        );
    }
    Ok(())
}

async fn run(errand: &Errand) -> CliResult<()> {
    let mut events = errand.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DomainEvent::StatusChanged { task_id, to, .. } => println!("{task_id}  {to}"),
                DomainEvent::ResultRecorded {
                    task_id, payload, ..
                } => println!("{task_id}  => {payload}"),
                DomainEvent::RunFinished { .. } => break,
                _ => {}
            }
        }
    });

    let run = errand.run();
    tokio::pin!(run);
    let mut cancelling = false;
    let summary = loop {
        tokio::select! {
            result = &mut run => break result?,
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                warn!("stopping after the current task");
                errand.cancel_run();
            }
        }
    };

    if let Err(err) = printer.await {
        warn!(error = %err, "event printer stopped");
    }
    info!(run_id = %summary.run_id, "run complete");
    println!(
        "attempted {}, completed {}, failed {}, skipped {}{}",
        summary.attempted,
        summary.completed,
        summary.failed,
        summary.skipped,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

async fn show_results(history: Option<&HistoryLog>, id: TaskId) -> CliResult<()> {
    let Some(history) = history else {
        return Err("results are read from the history log, which --ephemeral disables".into());
    };

    let mut found = 0;
    for entry in history.entries(None, Some("execution")).await {
        if let Ok(DomainEvent::ResultRecorded {
            task_id,
            run_id,
            sequence_index,
            succeeded,
            payload,
        }) = serde_json::from_value::<DomainEvent>(entry.details)
            && task_id == id
        {
            found += 1;
            let mark = if succeeded { "ok  " } else { "fail" };
            println!("#{sequence_index:<4} {mark}  {run_id}  {}\n      {payload}", entry.timestamp);
        }
    }
    if found == 0 {
        println!("no results for {id}");
    }
    Ok(())
}

async fn show_history(
    history: Option<&HistoryLog>,
    limit: Option<usize>,
    category: Option<String>,
    search: Option<String>,
) -> CliResult<()> {
    let Some(history) = history else {
        return Err("--ephemeral keeps no history".into());
    };

    let mut entries: Vec<HistoryEntry> = match &search {
        Some(keyword) => history.search(keyword).await,
        None => history.entries(None, None).await,
    };
    if let Some(category) = &category {
        entries.retain(|e| &e.category == category);
    }
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    for entry in entries {
        println!(
            "{}  {:<9}  {:<16}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.category,
            entry.action,
            entry.details
        );
    }
    Ok(())
}
