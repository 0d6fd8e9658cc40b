mod aggregator;
mod backend;
mod cli;
mod clock;
mod config;
mod controller;
mod countdown;
mod database;
mod models;
mod penalty;
mod ui;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};

use backend::feed::{DataVersionFeed, PollFeed};
use backend::remote::RemoteBackend;
use backend::Backend;
use clock::{SystemClock, TimeSource};
use config::{AppConfig, BackendKind};
use controller::{spawn_dashboard, DashboardState, RenderModel, UiCommand};
use database::{Database, NewTask};
use models::{FilterMode, OrderRef, Priority, SortMode, TaskStatus, WorkerProfile};
use penalty::format_amount;
use ui::run_tui;

/// How often the local store is checked for commits from other processes.
const DATA_VERSION_PERIOD: Duration = Duration::from_secs(1);

fn log_file_path() -> PathBuf {
    let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home_dir).join(".worker-dash").join("dashboard.log")
}

fn init_logging(to_file: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().filter_or("WORKER_DASH_LOG", "warn"));

    // The alternate screen would be scribbled over by stderr output
    if to_file {
        let path = log_file_path();
        let file = path
            .parent()
            .and_then(|dir| fs::create_dir_all(dir).ok())
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path).ok());
        match file {
            Some(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            None => {
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }

    let _ = builder.try_init();
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM` read in the reference timezone.
fn parse_due(value: &str, tz: Tz) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value.trim()) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid due date '{}', expected RFC 3339 or YYYY-MM-DD HH:MM", value))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("'{}' does not exist in {}", value, tz))
}

fn parse_priority(value: Option<&str>) -> Result<Option<Priority>> {
    match value {
        None => Ok(None),
        Some(raw) => Priority::parse(raw)
            .map(Some)
            .ok_or_else(|| anyhow!("Unknown priority '{}', use low, medium, high or urgent", raw)),
    }
}

/// One pass of the dashboard pipeline without the live loop.
async fn snapshot<B: Backend>(backend: &B, app: &AppConfig, filter: FilterMode, sort: SortMode) -> Result<RenderModel> {
    let config = app.dashboard_config()?;
    let mut state = DashboardState::new(&config, SystemClock.now());

    let (tasks, earned, presence) = tokio::join!(
        backend.fetch_tasks(&config.worker_id),
        backend.fetch_total_earned(&config.worker_id),
        backend.fetch_presence(&config.worker_id),
    );
    let tasks = tasks.context("Failed to load tasks")?;
    state.on_tasks(Ok(tasks));
    state.on_earnings(earned);
    state.on_presence(presence);

    state.on_command(UiCommand::SetFilter(filter));
    state.on_command(UiCommand::SetSort(sort));
    Ok(state.render())
}

fn print_tasks(model: &RenderModel) {
    if model.cards.is_empty() {
        println!("No tasks to display");
        return;
    }
    println!("{} tasks ({}, by {}):", model.cards.len(), model.filter.label(), model.sort.label());
    for card in &model.cards {
        let short_id: String = card.id.chars().take(8).collect();
        let timer = match card.countdown {
            Some(c) if c.is_overdue => format!("OVERDUE by {}", c.format_clock()),
            Some(c) if c.is_critical => format!("{} left (critical)", c.format_clock()),
            Some(c) => format!("{} left", c.format_clock()),
            None => "no deadline".to_string(),
        };
        let payout = if card.is_overdue() {
            format!("{} (was {})", format_amount(card.display_amount), format_amount(card.base_amount))
        } else {
            format_amount(card.display_amount)
        };
        println!(
            "  {} [{}] {} - {} - {} - {}",
            short_id, card.priority_label, card.title, card.status_label, payout, timer
        );
        if let Some(order) = &card.order {
            println!("      {} · {}", order.title, order.client_name);
        }
    }
}

fn print_metrics(model: &RenderModel) {
    println!("{} ({})", model.profile.display_name(), if model.online { "online" } else { "offline" });
    println!("  In progress:     {}", format_amount(model.metrics.total_in_progress_sum));
    println!("  Earned:          {}", format_amount(model.metrics.total_earned));
    println!("  Current tasks:   {}", model.metrics.current_tasks_count);
    println!("  Completed today: {}", model.metrics.completed_today_count);
}

async fn complete_by_prefix<B: Backend>(backend: &B, worker_id: &str, prefix: &str) -> Result<String> {
    let tasks = backend.fetch_tasks(worker_id).await.context("Failed to load tasks")?;
    let mut matches = tasks.into_iter().filter(|t| t.id.starts_with(prefix));
    let task = matches
        .next()
        .ok_or_else(|| anyhow!("No task matching '{}'", prefix))?;
    if matches.next().is_some() {
        bail!("Task id '{}' is ambiguous", prefix);
    }
    backend
        .complete_task(&task)
        .await
        .with_context(|| format!("Could not complete '{}'", task.title))?;
    Ok(task.title)
}

enum Command<'a> {
    Tasks(FilterMode, SortMode),
    Metrics,
    Complete(&'a str),
}

async fn run_command<B: Backend>(backend: &B, app: &AppConfig, command: Command<'_>) -> Result<()> {
    match command {
        Command::Tasks(filter, sort) => print_tasks(&snapshot(backend, app, filter, sort).await?),
        Command::Metrics => print_metrics(&snapshot(backend, app, FilterMode::Current, SortMode::Deadline).await?),
        Command::Complete(prefix) => {
            let title = complete_by_prefix(backend, app.worker_id()?, prefix).await?;
            println!("Completed '{}'", title);
        }
    }
    Ok(())
}

fn with_backend(db: &Database, app: &AppConfig, command: Command<'_>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    match app.backend {
        BackendKind::Local => {
            let local = db.clone().with_penalty(app.penalty());
            rt.block_on(run_command(&local, app, command))
        }
        BackendKind::Remote => {
            let (url, key) = app.remote_endpoint()?;
            let remote = RemoteBackend::new(url, key).context("Failed to build HTTP client")?;
            rt.block_on(run_command(&remote, app, command))
        }
    }
}

fn run_dashboard(db: &Database, app: &AppConfig) -> Result<()> {
    let config = app.dashboard_config()?;
    let rt = tokio::runtime::Runtime::new()?;
    let _guard = rt.enter();

    let mut handle = match app.backend {
        BackendKind::Local => {
            let local = Arc::new(db.clone().with_penalty(app.penalty()));
            let mut handle = spawn_dashboard(local, SystemClock, config);
            handle.attach_feed(DataVersionFeed::new(db.clone(), DATA_VERSION_PERIOD));
            handle
        }
        BackendKind::Remote => {
            let (url, key) = app.remote_endpoint()?;
            let remote = RemoteBackend::new(url, key).context("Failed to build HTTP client")?;
            spawn_dashboard(Arc::new(remote), SystemClock, config)
        }
    };
    handle.attach_feed(PollFeed::new(app.poll));
    log::info!("dashboard started for worker {}", app.worker_id()?);

    run_tui(handle)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, None | Some(Commands::Dashboard)));

    let db = Database::new()?;
    let app = AppConfig::load(&db)?;

    match cli.command {
        Some(Commands::Tasks { filter, sort }) => {
            with_backend(&db, &app, Command::Tasks(filter, sort))?;
        }
        Some(Commands::Metrics) => {
            with_backend(&db, &app, Command::Metrics)?;
        }
        Some(Commands::TaskAdd {
            title,
            due,
            salary,
            priority,
            description,
            order,
            client,
            worker,
        }) => {
            let worker_id = match worker {
                Some(worker) => worker,
                None => app.worker_id()?.to_string(),
            };
            let task = NewTask {
                worker_id,
                title,
                description,
                salary,
                due_date: parse_due(&due, app.timezone)?,
                priority: parse_priority(priority.as_deref())?,
                order: order.map(|title| OrderRef {
                    title,
                    client_name: client.unwrap_or_default(),
                }),
            };
            let id = db.add_task(&task)?;
            println!("Task '{}' added with id {}", task.title, id);
        }
        Some(Commands::TaskStatus { task_id, status }) => {
            let status = TaskStatus::parse(&status)
                .ok_or_else(|| anyhow!("Unknown status '{}', use pending, in_progress or completed", status))?;
            let id = db
                .resolve_task_id(&task_id)?
                .ok_or_else(|| anyhow!("No task matching '{}'", task_id))?;
            db.update_task_status(&id, status, Utc::now())?;
            println!("Task {} is now {}", id, status.label());
        }
        Some(Commands::TaskComplete { task_id }) => {
            with_backend(&db, &app, Command::Complete(&task_id))?;
        }
        Some(Commands::Worker {
            worker_id,
            name,
            email,
            role,
            avatar_url,
        }) => {
            let profile = WorkerProfile {
                id: worker_id,
                full_name: name,
                email,
                role,
                avatar_url,
            };
            db.upsert_worker(&profile, Utc::now())?;
            println!("Worker {} saved", profile.display_name());
        }

        Some(Commands::Set { key, value }) => {
            config::validate(&key, &value)?;
            let description = config::find_key(&key).map(|k| k.description);
            db.set_config(&key, &value, description)?;
            println!("Config '{}' set to '{}'", key, value);
        }

        Some(Commands::Get { key }) => match db.get_config(&key)? {
            Some(value) => println!("{}", value),
            None => println!("Config '{}' not found", key),
        },

        Some(Commands::ConfigList) => {
            let configs = db.get_all_configs()?;
            if configs.is_empty() {
                println!("No configuration values set");
            }
            for item in configs {
                match item.description {
                    Some(description) => println!("{} = {}  # {}", item.key_name, item.value, description),
                    None => println!("{} = {}", item.key_name, item.value),
                }
            }
        }

        Some(Commands::ConfigDelete { key }) => {
            if db.delete_config(&key)? {
                println!("Config '{}' deleted", key);
            } else {
                println!("Config '{}' not found", key);
            }
        }

        Some(Commands::Completions { shell }) => {
            use clap_complete::{generate, Shell};
            let shell = shell.to_lowercase();
            let shell_enum = match shell.as_str() {
                "bash" => Shell::Bash,
                "zsh" => Shell::Zsh,
                "fish" => Shell::Fish,
                "elvish" => Shell::Elvish,
                "powershell" => Shell::PowerShell,
                _ => {
                    println!("Unsupported shell: {}", shell);
                    return Ok(());
                }
            };
            let mut cmd = Cli::command();
            generate(shell_enum, &mut cmd, "worker-dash", &mut std::io::stdout());
        }
        Some(Commands::Dashboard) | None => {
            run_dashboard(&db, &app)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn due_dates_read_in_the_reference_timezone() {
        let moscow = chrono_tz::Europe::Moscow;
        assert_eq!(
            parse_due("2024-05-01 13:00", moscow).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            parse_due("2024-05-01T13:00:00+00:00", moscow).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
        );
        assert!(parse_due("tomorrow", moscow).is_err());
    }

    #[test]
    fn priorities_parse_or_fail_loudly() {
        assert_eq!(parse_priority(None).unwrap(), None);
        assert_eq!(parse_priority(Some("urgent")).unwrap(), Some(Priority::Urgent));
        assert!(parse_priority(Some("whenever")).is_err());
    }

    #[tokio::test]
    async fn snapshot_applies_filter_and_sort() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for (title, salary, hours) in [("cheap", 100.0, 1), ("rich", 900.0, 5)] {
            db.add_task(&NewTask {
                worker_id: "w1".to_string(),
                title: title.to_string(),
                salary: Some(salary),
                due_date: now + chrono::Duration::hours(hours),
                ..Default::default()
            })
            .unwrap();
        }
        let app = AppConfig {
            worker_id: Some("w1".to_string()),
            ..Default::default()
        };

        let model = snapshot(&db, &app, FilterMode::All, SortMode::Salary).await.unwrap();
        let titles: Vec<&str> = model.cards.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["rich", "cheap"]);
        assert_eq!(model.metrics.current_tasks_count, 2);
        assert_eq!(model.metrics.total_in_progress_sum, 1000.0);

        let title = complete_by_prefix(&db, "w1", &model.cards[1].id).await.unwrap();
        assert_eq!(title, "cheap");
        assert!(complete_by_prefix(&db, "w1", "nope").await.is_err());
    }
}
