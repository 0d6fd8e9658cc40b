use clap::{Parser, Subcommand};

use crate::models::{FilterMode, SortMode};

#[derive(Parser)]
#[command(author, version, about = "Worker task dashboard with live deadline countdowns", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the live dashboard
    Dashboard,
    /// Print the worker's tasks with their countdowns
    Tasks {
        #[arg(short, long, value_enum, default_value_t = FilterMode::Current)]
        filter: FilterMode,
        #[arg(short, long, value_enum, default_value_t = SortMode::Deadline)]
        sort: SortMode,
    },
    /// Print KPI metrics
    Metrics,
    /// Add a task to the local store
    TaskAdd {
        #[arg(value_name = "TITLE")]
        title: String,
        /// Deadline, RFC 3339 or "YYYY-MM-DD HH:MM" in the reference timezone
        #[arg(short, long)]
        due: String,
        #[arg(long)]
        salary: Option<f64>,
        /// low, medium, high or urgent
        #[arg(short, long)]
        priority: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Parent order title
        #[arg(long)]
        order: Option<String>,
        #[arg(long, requires = "order")]
        client: Option<String>,
        /// Assign to this worker instead of the configured one
        #[arg(short, long)]
        worker: Option<String>,
    },
    /// Change a task's status in the local store
    TaskStatus {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
        /// pending, in_progress or completed
        #[arg(value_name = "STATUS")]
        status: String,
    },
    /// Complete a task through the configured store
    TaskComplete {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },
    /// Register or update a worker profile in the local store
    Worker {
        #[arg(value_name = "WORKER_ID")]
        worker_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    /// Set a config value
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },
    /// Get a config value
    Get {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// List all config values
    ConfigList,
    /// Delete a config value
    ConfigDelete {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_name = "SHELL")]
        shell: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tasks_defaults_to_current_by_deadline() {
        let cli = Cli::try_parse_from(["worker-dash", "tasks"]).unwrap();
        match cli.command {
            Some(Commands::Tasks { filter, sort }) => {
                assert_eq!(filter, FilterMode::Current);
                assert_eq!(sort, SortMode::Deadline);
            }
            _ => panic!("expected tasks command"),
        }

        let cli = Cli::try_parse_from(["worker-dash", "tasks", "-f", "all", "-s", "salary"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Tasks { filter: FilterMode::All, sort: SortMode::Salary })
        ));
    }

    #[test]
    fn client_requires_order() {
        assert!(Cli::try_parse_from(["worker-dash", "task-add", "Fix tap", "--due", "2024-05-01 10:00", "--client", "Ivanov"]).is_err());
        assert!(Cli::try_parse_from(["worker-dash"]).unwrap().command.is_none());
    }
}
