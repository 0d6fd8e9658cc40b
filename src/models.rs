use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "In progress",
            TaskStatus::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Badge text. A task without a priority reads "Normal", not "Low".
    pub fn label(priority: Option<Priority>) -> &'static str {
        match priority {
            Some(Priority::Low) => "Low",
            Some(Priority::Medium) => "Medium",
            Some(Priority::High) => "High",
            Some(Priority::Urgent) => "Urgent",
            None => "Normal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRef {
    pub title: String,
    pub client_name: String,
}

/// A worker's task as read from the store. The dashboard never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub salary: Option<f64>,
    /// `None` when the stored deadline is missing or unparseable.
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub order: Option<OrderRef>,
}

impl Task {
    /// Tasks with no status count as not completed.
    pub fn is_completed(&self) -> bool {
        self.status == Some(TaskStatus::Completed)
    }

    pub fn salary_or_zero(&self) -> f64 {
        self.salary.unwrap_or(0.0)
    }

    pub fn status_label(&self) -> &'static str {
        self.status.map(|s| s.label()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerProfile {
    pub id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub avatar_url: Option<String>,
}

impl WorkerProfile {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Worker")
    }

    pub fn initials(&self) -> String {
        let initials: String = self
            .full_name
            .as_deref()
            .unwrap_or("")
            .split(' ')
            .filter_map(|part| part.chars().next())
            .collect();
        if initials.is_empty() {
            "U".to_string()
        } else {
            initials
        }
    }

    pub fn role_label(&self) -> &str {
        self.role
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("Worker")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerPresence {
    pub profile: WorkerProfile,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FilterMode {
    All,
    #[default]
    Current,
    Completed,
}

impl FilterMode {
    pub fn next(self) -> Self {
        match self {
            FilterMode::All => FilterMode::Current,
            FilterMode::Current => FilterMode::Completed,
            FilterMode::Completed => FilterMode::All,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FilterMode::All => "All",
            FilterMode::Current => "Current",
            FilterMode::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortMode {
    #[default]
    Deadline,
    Salary,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            SortMode::Deadline => SortMode::Salary,
            SortMode::Salary => SortMode::Deadline,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortMode::Deadline => "Deadline",
            SortMode::Salary => "Salary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PopupMode {
    None,
    ConfirmCompletion,
}

/// Parses the timestamp shapes the stores hand back: RFC 3339 with an
/// offset, or a bare `YYYY-MM-DD[T ]HH:MM:SS[.fff]` taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Postgres renders timestamptz as "2024-05-01 10:00:00+00"
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
