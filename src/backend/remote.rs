//! PostgREST-style client for the hosted store (`/rest/v1/...`).

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BackendError, BackendResult, CompletionWorkflow, EarningsSource, PresenceSource, TaskSource};
use crate::database::PRESENCE_WINDOW_SECS;
use crate::models::{parse_timestamp, OrderRef, Priority, Task, TaskStatus, WorkerPresence, WorkerProfile};

#[derive(Debug, Deserialize)]
struct OrderRow {
    title: Option<String>,
    client_name: Option<String>,
}

/// Loose view of one `zadachi` row. Every field may be missing or junk;
/// only `uuid_zadachi` is required for the row to be kept.
#[derive(Debug, Deserialize)]
struct TaskRow {
    uuid_zadachi: Option<String>,
    title: Option<String>,
    description: Option<String>,
    salary: Option<f64>,
    due_date: Option<String>,
    priority: Option<String>,
    status: Option<String>,
    completed_at: Option<String>,
    zakazi: Option<OrderRow>,
}

impl TaskRow {
    fn into_task(self) -> Option<Task> {
        let id = self.uuid_zadachi?;
        let due_date = self.due_date.as_deref().and_then(parse_timestamp);
        if due_date.is_none() {
            log::warn!("task {} has no usable due date ({:?})", id, self.due_date);
        }
        Some(Task {
            title: self.title.unwrap_or_default(),
            description: self.description,
            salary: self.salary,
            due_date,
            priority: self.priority.as_deref().and_then(Priority::parse),
            status: self.status.as_deref().and_then(TaskStatus::parse),
            completed_at: self.completed_at.as_deref().and_then(parse_timestamp),
            order: self.zakazi.map(|o| OrderRef {
                title: o.title.unwrap_or_default(),
                client_name: o.client_name.unwrap_or_default(),
            }),
            id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EarningsRow {
    salary: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    full_name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    avatar_url: Option<String>,
    last_seen: Option<String>,
}

#[derive(Serialize)]
struct CompletionPatch {
    status: &'static str,
    completed_at: String,
}

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

pub struct RemoteBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> BackendResult<Self> {
        Self::with_timeout(base_url, api_key, REQUEST_TIMEOUT)
    }

    /// Every request gives up after `timeout`, so a stalled server can
    /// never pin the dashboard's single task fetch.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> BackendResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(RemoteBackend {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", self.api_key.as_str())
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Permission(body),
            StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE => {
                BackendError::NotFound(format!("{}: {}", status, body))
            }
            _ => BackendError::Transport(format!("{}: {}", status, body)),
        })
    }

    async fn fetch_user_row<T: serde::de::DeserializeOwned>(&self, worker_id: &str, columns: &str) -> BackendResult<T> {
        let filter = format!("eq.{}", worker_id);
        let request = self
            .client
            .get(self.table("users"))
            .query(&[("select", columns), ("uuid_user", filter.as_str())])
            .header("Accept", "application/vnd.pgrst.object+json");
        let row = self.send(request).await?.json::<T>().await?;
        Ok(row)
    }
}

impl TaskSource for RemoteBackend {
    async fn fetch_tasks(&self, worker_id: &str) -> BackendResult<Vec<Task>> {
        let filter = format!("eq.{}", worker_id);
        let request = self.client.get(self.table("zadachi")).query(&[
            ("select", "*,zakazi(title,client_name)"),
            ("responsible_user_id", filter.as_str()),
            ("order", "due_date.asc"),
        ]);
        let rows: Vec<Value> = self.send(request).await?.json().await?;

        // Decode row by row so one bad record does not sink the rest
        let mut tasks = Vec::with_capacity(rows.len());
        for raw in rows {
            match serde_json::from_value::<TaskRow>(raw).map(TaskRow::into_task) {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => log::warn!("skipping task row without id"),
                Err(e) => log::warn!("skipping undecodable task row: {}", e),
            }
        }
        log::debug!("fetched {} tasks for {}", tasks.len(), worker_id);
        Ok(tasks)
    }
}

impl EarningsSource for RemoteBackend {
    async fn fetch_total_earned(&self, worker_id: &str) -> BackendResult<f64> {
        let row: EarningsRow = self.fetch_user_row(worker_id, "salary,completed_tasks").await?;
        Ok(row.salary.unwrap_or(0.0))
    }
}

impl PresenceSource for RemoteBackend {
    async fn fetch_presence(&self, worker_id: &str) -> BackendResult<WorkerPresence> {
        let row: ProfileRow = self
            .fetch_user_row(worker_id, "full_name,email,role,avatar_url,last_seen")
            .await?;
        Ok(WorkerPresence {
            online: is_recent(row.last_seen.as_deref(), Utc::now()),
            profile: WorkerProfile {
                id: worker_id.to_string(),
                full_name: row.full_name,
                email: row.email,
                role: row.role,
                avatar_url: row.avatar_url,
            },
        })
    }
}

impl CompletionWorkflow for RemoteBackend {
    async fn complete_task(&self, task: &Task) -> BackendResult<()> {
        let patch = CompletionPatch {
            status: TaskStatus::Completed.as_str(),
            completed_at: Utc::now().to_rfc3339(),
        };
        let request = self
            .client
            .patch(self.table("zadachi"))
            // Already-completed rows are left alone so completed_at is never rewritten
            .query(&[
                ("uuid_zadachi", format!("eq.{}", task.id)),
                ("status", format!("neq.{}", TaskStatus::Completed.as_str())),
            ])
            .header("Prefer", "return=representation")
            .json(&patch);
        let updated: Vec<Value> = self.send(request).await?.json().await?;
        if updated.is_empty() {
            return Err(BackendError::NotFound(format!("open task '{}'", task.id)));
        }
        log::info!("task {} marked completed remotely", task.id);
        Ok(())
    }
}

fn is_recent(last_seen: Option<&str>, now: DateTime<Utc>) -> bool {
    last_seen
        .and_then(parse_timestamp)
        .map(|seen| now - seen <= Duration::seconds(PRESENCE_WINDOW_SECS))
        .unwrap_or(false)
}
