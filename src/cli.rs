use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::commands::{self, CommandResult, ErrorKind, ListPayload};
use crate::models::{Filter, Priority, Settings, Stats, Task, TaskId};
use crate::storage::{Storage, DEFAULT_DATA_FILE};

#[derive(Debug, Parser)]
#[command(name = "tasklist", version, about = "Keep a prioritized task list on disk")]
pub struct Cli {
    /// Task file to read and write
    #[arg(long, env = "TASKLIST_FILE", default_value = DEFAULT_DATA_FILE, global = true)]
    pub file: PathBuf,

    /// Print every result as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a task
    Add {
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,
    },
    /// Mark a task done, or not done again
    Toggle { id: TaskId },
    /// Replace the text of a task
    Edit {
        id: TaskId,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Delete a task
    Delete { id: TaskId },
    /// Delete every completed task
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show tasks, open ones first
    List {
        #[arg(short, long, value_enum)]
        filter: Option<FilterArg>,
    },
    /// Show task counts
    Stats,
    /// Create, list or restore snapshots of the task file
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Write the list to exports/ as CSV or Markdown
    Export {
        #[arg(value_enum)]
        format: ExportFormat,
    },
    /// Show or change settings.json
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Snapshot the task file into backups/
    Create,
    /// List snapshots, oldest first
    List,
    /// Replace the task file with a snapshot
    Restore { name: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Show,
    SetPriority {
        #[arg(value_enum)]
        priority: PriorityArg,
    },
    SetFilter {
        #[arg(value_enum)]
        filter: FilterArg,
    },
    SetBackupKeep { keep: usize },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FilterArg {
    All,
    Active,
    Completed,
}

impl From<FilterArg> for Filter {
    fn from(value: FilterArg) -> Self {
        match value {
            FilterArg::All => Filter::All,
            FilterArg::Active => Filter::Active,
            FilterArg::Completed => Filter::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Md,
}

impl Command {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Command::Add { .. }
                | Command::Toggle { .. }
                | Command::Edit { .. }
                | Command::Delete { .. }
                | Command::Clear { .. }
                | Command::Backup(BackupCommand::Create)
        )
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let storage = Storage::new(cli.file.clone());
    let settings = commands::load_settings(&storage);

    if let Command::Config(command) = &cli.command {
        return run_config(&cli, &storage, settings, command);
    }

    let (mut store, load_error) = commands::open_store(storage);
    if let Some(error) = load_error {
        eprintln!(
            "warning: could not read {}: {error}",
            store.storage().data_path().display()
        );
        // Saving now would overwrite the unreadable file with an empty list.
        if cli.command.mutates() {
            eprintln!("refusing to modify the list until the file is fixed or restored");
            return ExitCode::FAILURE;
        }
    }

    match &cli.command {
        Command::Add { text, priority } => {
            let priority = priority.map(Priority::from).unwrap_or(settings.default_priority);
            let res = commands::add_task(&mut store, &text.join(" "), priority);
            report(&cli, res, |task| println!("added {}", task_line(task)))
        }
        Command::Toggle { id } => {
            let res = commands::toggle_task(&mut store, *id);
            report(&cli, res, |task| print_changed("toggled", *id, task.as_ref()))
        }
        Command::Edit { id, text } => {
            let res = commands::edit_task(&mut store, *id, &text.join(" "));
            report(&cli, res, |task| print_changed("edited", *id, task.as_ref()))
        }
        Command::Delete { id } => {
            let res = commands::delete_task(&mut store, *id);
            report(&cli, res, |task| print_changed("deleted", *id, task.as_ref()))
        }
        Command::Clear { yes } => {
            let pending = store.stats().completed;
            if pending > 0 && !yes && !confirm(&format!("Delete {pending} completed task(s)?")) {
                println!("cancelled");
                return ExitCode::SUCCESS;
            }
            let res = commands::clear_completed(&mut store);
            report(&cli, res, |removed| println!("removed {removed} completed task(s)"))
        }
        Command::List { filter } => {
            let filter = filter.map(Filter::from).unwrap_or(settings.default_filter);
            let res = commands::list_tasks(&store, filter);
            report(&cli, res, print_list)
        }
        Command::Stats => report(&cli, commands::stats(&store), |stats| {
            println!("{}", stats_line(stats))
        }),
        Command::Backup(BackupCommand::Create) => {
            let res = commands::create_backup(&store, &settings);
            report(&cli, res, |name| println!("created backup {name}"))
        }
        Command::Backup(BackupCommand::List) => report(&cli, commands::list_backups(&store), |list| {
            if list.is_empty() {
                println!("no backups");
            }
            for entry in list {
                println!("{}", entry.name);
            }
        }),
        Command::Backup(BackupCommand::Restore { name }) => {
            let res = commands::restore_backup(&mut store, name);
            report(&cli, res, |tasks| {
                println!("restored {} task(s) from {name}", tasks.len())
            })
        }
        Command::Export { format } => {
            let res = match format {
                ExportFormat::Csv => commands::export_csv(&store),
                ExportFormat::Md => commands::export_markdown(&store),
            };
            report(&cli, res, |path| println!("exported to {path}"))
        }
        Command::Config(_) => ExitCode::SUCCESS,
    }
}

fn run_config(cli: &Cli, storage: &Storage, mut settings: Settings, command: &ConfigCommand) -> ExitCode {
    match command {
        ConfigCommand::Show => {}
        ConfigCommand::SetPriority { priority } => settings.default_priority = (*priority).into(),
        ConfigCommand::SetFilter { filter } => settings.default_filter = (*filter).into(),
        ConfigCommand::SetBackupKeep { keep } => settings.backup_keep = (*keep).max(1),
    }
    let res = if matches!(command, ConfigCommand::Show) {
        CommandResult {
            ok: true,
            data: Some(settings),
            error: None,
            kind: None,
        }
    } else {
        commands::update_settings(storage, settings)
    };
    report(cli, res, |settings| {
        println!("default_priority: {}", settings.default_priority);
        println!("default_filter: {:?}", settings.default_filter);
        println!("backup_keep: {}", settings.backup_keep);
    })
}

/// Renders a result as JSON or through `render`, and maps error kinds to exit codes.
fn report<T: Serialize>(cli: &Cli, res: CommandResult<T>, render: impl FnOnce(&T)) -> ExitCode {
    let code = match res.kind {
        None | Some(ErrorKind::EmptyOperation) => ExitCode::SUCCESS,
        Some(ErrorKind::Validation | ErrorKind::Persistence | ErrorKind::IdsExhausted) => {
            ExitCode::FAILURE
        }
    };
    if cli.json {
        match serde_json::to_string_pretty(&res) {
            Ok(json) => println!("{json}"),
            Err(error) => eprintln!("error: {error}"),
        }
        return code;
    }
    match (&res.data, &res.error, res.kind) {
        (Some(data), _, _) => render(data),
        (None, Some(message), Some(ErrorKind::EmptyOperation)) => println!("{message}"),
        (None, Some(message), _) => eprintln!("error: {message}"),
        (None, None, _) => {}
    }
    code
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn task_line(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    format!("[{mark}] #{} ({}) {}", task.id, task.priority, task.text)
}

fn stats_line(stats: &Stats) -> String {
    format!(
        "Total: {} | Active: {} | Completed: {}",
        stats.total, stats.active, stats.completed
    )
}

fn print_changed(verb: &str, id: TaskId, task: Option<&Task>) {
    match task {
        Some(task) => println!("{verb} {}", task_line(task)),
        None => println!("no task #{id}"),
    }
}

fn print_list(payload: &ListPayload) {
    if payload.tasks.is_empty() {
        println!("no tasks");
    }
    for task in &payload.tasks {
        println!("{}", task_line(task));
    }
    println!("{}", stats_line(&payload.stats));
}
