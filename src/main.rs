use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use std::path::PathBuf;
use std::time::Duration;
use tasksdb::{Options, UpdatePolicy};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_NAME: &str = "tasks.db";

#[derive(Parser)]
#[command(name = "tasks")]
#[command(about = "Keep a task list in a single-file database")]
#[command(version)]
#[command(after_help = "Logs go to stderr; set RUST_LOG (e.g. RUST_LOG=tasksdb=debug) to enable them.")]
struct Cli {
    /// Path to the database file (default: ~/tasks.db)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Seconds to wait for another process to release the database
    #[arg(long, default_value_t = 1.0)]
    timeout: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// List all tasks
    List {
        /// Print tasks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace the text of a task
    Update {
        id: u64,

        #[arg(required = true)]
        text: Vec<String>,

        /// Fail instead of creating the task when the id does not exist
        #[arg(long)]
        strict: bool,
    },

    /// Remove tasks
    Rm {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

fn db_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.db {
        Some(path) => Ok(path.clone()),
        None => dirs::home_dir()
            .map(|home| home.join(DEFAULT_DB_NAME))
            .ok_or_else(|| eyre!("Could not determine home directory; pass --db")),
    }
}

fn main() -> Result<()> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = db_path(&cli)?;
    let options = Options {
        timeout: Duration::try_from_secs_f64(cli.timeout).context("Invalid --timeout")?,
        ..Options::default()
    };

    let (bucket, store) =
        tasksdb::init_with(&path, &options).with_context(|| format!("Can't initialize database at {}", path.display()))?;

    match cli.command {
        Commands::Add { text } => {
            let id = tasksdb::create_task(&text.join(" "), &bucket, &store).context("Failed to add task")?;
            println!("Added task {}", id.to_string().bold());
        }
        Commands::List { json } => {
            let tasks = tasksdb::all_tasks(&bucket, &store).context("Failed to list tasks")?;
            if json {
                let rows: Vec<_> = tasks
                    .iter()
                    .map(|task| serde_json::json!({ "id": task.id, "fields": task.fields() }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if tasks.is_empty() {
                println!("{}", "No tasks".dimmed());
            } else {
                for task in &tasks {
                    let fields = task.fields();
                    let mark = if fields.is_done() { "x".green() } else { " ".normal() };
                    println!(
                        "[{}] {:>4}  {}  {}",
                        mark,
                        task.id.to_string().bold(),
                        fields.text,
                        fields.created_at.dimmed()
                    );
                }
            }
        }
        Commands::Update { id, text, strict } => {
            let policy = if strict { UpdatePolicy::RequireExisting } else { UpdatePolicy::Upsert };
            tasksdb::update_task_with(&text.join(" "), id, &bucket, &store, policy)
                .with_context(|| format!("Failed to update task {}", id))?;
            println!("Updated task {}", id.to_string().bold());
        }
        Commands::Rm { ids } => {
            for id in ids {
                tasksdb::delete_task(id, &bucket, &store).with_context(|| format!("Failed to remove task {}", id))?;
                println!("Removed task {}", id.to_string().bold());
            }
        }
    }

    store.close()?;
    Ok(())
}
