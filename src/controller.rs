//! Dashboard controller.
//!
//! [`DashboardState`] is the single owner of everything that changes while
//! the dashboard is open: the clock reading, the task snapshot, the
//! filter/sort choice and the task picked for completion. It never performs
//! I/O itself; each handler returns the [`Effect`]s it wants run.
//!
//! [`spawn_dashboard`] drives that state from one tokio task. Ticks, change
//! notices, UI commands and finished fetches are handled strictly in turn,
//! fetches run on their own tasks so a slow store never stalls the clock,
//! and every resulting [`RenderModel`] is published whole through a watch
//! channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{Id, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::aggregator::{aggregate, Metrics};
use crate::backend::{Backend, BackendResult, ChangeFeed};
use crate::clock::TimeSource;
use crate::countdown::{CountdownEngine, CountdownResult};
use crate::models::{FilterMode, OrderRef, Priority, SortMode, Task, WorkerPresence, WorkerProfile};
use crate::penalty::PenaltyPolicy;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub worker_id: String,
    pub tick: Duration,
    pub countdown: CountdownEngine,
    pub penalty: PenaltyPolicy,
}

impl DashboardConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        DashboardConfig {
            worker_id: worker_id.into(),
            tick: DEFAULT_TICK,
            countdown: CountdownEngine::default(),
            penalty: PenaltyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Ready,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Success(String),
    Failure(String),
}

/// One task as it should be drawn at the current instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCard {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub order: Option<OrderRef>,
    pub priority: Option<Priority>,
    pub priority_label: &'static str,
    pub status_label: &'static str,
    pub is_completed: bool,
    /// `None` for tasks without a usable deadline.
    pub countdown: Option<CountdownResult>,
    pub due_label: Option<String>,
    pub base_amount: f64,
    pub display_amount: f64,
}

impl TaskCard {
    pub fn is_overdue(&self) -> bool {
        self.countdown.map(|c| c.is_overdue).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderModel {
    pub now: DateTime<Utc>,
    pub filter: FilterMode,
    pub sort: SortMode,
    pub load_state: LoadState,
    /// Last refresh error while an older snapshot is still on screen.
    pub stale_reason: Option<String>,
    pub refreshing: bool,
    pub cards: Vec<TaskCard>,
    pub completed: Vec<TaskCard>,
    pub metrics: Metrics,
    pub profile: WorkerProfile,
    pub online: bool,
    pub selected: Option<TaskCard>,
    pub completing: bool,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    SetFilter(FilterMode),
    SetSort(SortMode),
    CycleFilter,
    CycleSort,
    Select(String),
    CancelSelection,
    ConfirmCompletion,
    Refresh,
    DismissNotice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchTasks,
    FetchEarnings,
    FetchPresence,
    Complete(Task),
}

/// Which request a spawned effect was serving, kept so a lost one can be
/// accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Tasks,
    Earnings,
    Presence,
    Completion,
}

impl Effect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::FetchTasks => EffectKind::Tasks,
            Effect::FetchEarnings => EffectKind::Earnings,
            Effect::FetchPresence => EffectKind::Presence,
            Effect::Complete(_) => EffectKind::Completion,
        }
    }
}

pub struct DashboardState {
    worker_id: String,
    now: DateTime<Utc>,
    countdown: CountdownEngine,
    penalty: PenaltyPolicy,
    snapshot: Option<Vec<Task>>,
    last_error: Option<String>,
    filter: FilterMode,
    sort: SortMode,
    selected: Option<Task>,
    total_earned: f64,
    presence: Option<WorkerPresence>,
    tasks_in_flight: bool,
    tasks_dirty: bool,
    completing: bool,
    notice: Option<Notice>,
}

impl DashboardState {
    pub fn new(config: &DashboardConfig, now: DateTime<Utc>) -> Self {
        DashboardState {
            worker_id: config.worker_id.clone(),
            now,
            countdown: config.countdown,
            penalty: config.penalty,
            snapshot: None,
            last_error: None,
            filter: FilterMode::default(),
            sort: SortMode::default(),
            selected: None,
            total_earned: 0.0,
            presence: None,
            tasks_in_flight: false,
            tasks_dirty: false,
            completing: false,
            notice: None,
        }
    }

    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects: Vec<Effect> = self.request_tasks().into_iter().collect();
        effects.push(Effect::FetchEarnings);
        effects.push(Effect::FetchPresence);
        effects
    }

    /// Moves the clock. Countdowns are derived in `render`, never stored.
    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    pub fn on_change(&mut self) -> Option<Effect> {
        self.request_tasks()
    }

    /// At most one task fetch is in flight; anything asked for meanwhile
    /// folds into a single follow-up.
    fn request_tasks(&mut self) -> Option<Effect> {
        if self.tasks_in_flight {
            self.tasks_dirty = true;
            None
        } else {
            self.tasks_in_flight = true;
            self.tasks_dirty = false;
            Some(Effect::FetchTasks)
        }
    }

    pub fn on_tasks(&mut self, result: BackendResult<Vec<Task>>) -> Option<Effect> {
        self.tasks_in_flight = false;
        match result {
            Ok(tasks) => {
                log::debug!("snapshot refreshed with {} tasks", tasks.len());
                self.snapshot = Some(tasks);
                self.last_error = None;
            }
            Err(e) => {
                // Keep whatever we had; a failed refresh never blanks the board
                log::warn!("task fetch failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
        if self.tasks_dirty {
            self.request_tasks()
        } else {
            None
        }
    }

    pub fn on_earnings(&mut self, result: BackendResult<f64>) {
        self.total_earned = result.unwrap_or_else(|e| {
            log::warn!("earnings fetch failed: {}", e);
            0.0
        });
    }

    pub fn on_presence(&mut self, result: BackendResult<WorkerPresence>) {
        match result {
            Ok(presence) => self.presence = Some(presence),
            Err(e) => {
                log::warn!("presence fetch failed: {}", e);
                self.presence = None;
            }
        }
    }

    pub fn on_command(&mut self, command: UiCommand) -> Vec<Effect> {
        match command {
            UiCommand::SetFilter(filter) => self.filter = filter,
            UiCommand::SetSort(sort) => self.sort = sort,
            UiCommand::CycleFilter => self.filter = self.filter.next(),
            UiCommand::CycleSort => self.sort = self.sort.next(),
            UiCommand::Select(task_id) => {
                if self.completing {
                    return Vec::new();
                }
                let found = self
                    .snapshot
                    .as_ref()
                    .and_then(|tasks| tasks.iter().find(|t| t.id == task_id))
                    .cloned();
                match found {
                    Some(task) if task.is_completed() => {
                        log::debug!("task {} is already completed, not selectable", task_id)
                    }
                    Some(task) => self.selected = Some(task),
                    None => log::debug!("ignoring selection of unknown task {}", task_id),
                }
            }
            UiCommand::CancelSelection => {
                if !self.completing {
                    self.selected = None;
                }
            }
            UiCommand::ConfirmCompletion => {
                if self.completing {
                    return Vec::new();
                }
                if let Some(task) = self.selected.clone() {
                    self.completing = true;
                    return vec![Effect::Complete(task)];
                }
            }
            UiCommand::Refresh => return self.request_tasks().into_iter().collect(),
            UiCommand::DismissNotice => self.notice = None,
        }
        Vec::new()
    }

    /// The store has answered the completion request. Nothing in the
    /// snapshot changes here; success only triggers a refetch.
    pub fn on_completion(&mut self, task_id: &str, result: BackendResult<()>) -> Vec<Effect> {
        self.completing = false;
        match result {
            Ok(()) => {
                log::info!("task {} completed", task_id);
                if self.selected.as_ref().map(|t| t.id.as_str()) == Some(task_id) {
                    self.selected = None;
                }
                self.notice = Some(Notice::Success("Task completed".to_string()));
                let mut effects: Vec<Effect> = self.request_tasks().into_iter().collect();
                effects.push(Effect::FetchEarnings);
                effects
            }
            Err(e) => {
                log::warn!("completing task {} failed: {}", task_id, e);
                self.notice = Some(Notice::Failure(format!("Could not complete task: {}", e)));
                Vec::new()
            }
        }
    }

    /// A spawned effect died without reporting back. Only the flag owned
    /// by that effect is released.
    pub fn on_fetch_lost(&mut self, kind: EffectKind) -> Option<Effect> {
        match kind {
            EffectKind::Tasks => {
                self.tasks_in_flight = false;
                self.request_tasks()
            }
            EffectKind::Earnings | EffectKind::Presence => None,
            EffectKind::Completion => {
                self.completing = false;
                self.notice = Some(Notice::Failure("Completion was interrupted".to_string()));
                // Whether the store applied it is unknown
                self.request_tasks()
            }
        }
    }

    fn card(&self, task: &Task) -> TaskCard {
        let countdown = task.due_date.map(|due| self.countdown.compute(due, self.now));
        let overdue = countdown.map(|c| c.is_overdue).unwrap_or(false);
        let base_amount = task.salary_or_zero();
        TaskCard {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            order: task.order.clone(),
            priority: task.priority,
            priority_label: Priority::label(task.priority),
            status_label: task.status_label(),
            is_completed: task.is_completed(),
            countdown,
            due_label: task.due_date.map(|due| self.countdown.format_due(due)),
            base_amount,
            display_amount: self.penalty.apply(base_amount, overdue),
        }
    }

    pub fn render(&self) -> RenderModel {
        let load_state = match (&self.snapshot, &self.last_error) {
            (Some(_), _) => LoadState::Ready,
            (None, Some(e)) => LoadState::Unavailable(e.clone()),
            (None, None) => LoadState::Loading,
        };
        let stale_reason = self.snapshot.as_ref().and(self.last_error.clone());

        let tasks = self.snapshot.as_deref().unwrap_or(&[]);
        let aggregation = aggregate(
            tasks,
            self.filter,
            self.sort,
            self.now,
            self.countdown.timezone(),
            self.total_earned,
        );

        let (profile, online) = match &self.presence {
            Some(presence) => (presence.profile.clone(), presence.online),
            None => (
                WorkerProfile {
                    id: self.worker_id.clone(),
                    ..Default::default()
                },
                false,
            ),
        };

        RenderModel {
            now: self.now,
            filter: self.filter,
            sort: self.sort,
            load_state,
            stale_reason,
            refreshing: self.tasks_in_flight,
            cards: aggregation.visible.iter().map(|t| self.card(t)).collect(),
            completed: aggregation.completed.iter().map(|t| self.card(t)).collect(),
            metrics: aggregation.metrics,
            profile,
            online,
            selected: self.selected.as_ref().map(|t| self.card(t)),
            completing: self.completing,
            notice: self.notice.clone(),
        }
    }
}

enum Outcome {
    Tasks(BackendResult<Vec<Task>>),
    Earnings(BackendResult<f64>),
    Presence(BackendResult<WorkerPresence>),
    Completed(String, BackendResult<()>),
}

/// Owns the controller task and any feeds pumping into it. Dropping the
/// handle stops all of them.
pub struct DashboardHandle {
    commands: mpsc::UnboundedSender<UiCommand>,
    changes: mpsc::UnboundedSender<()>,
    render: watch::Receiver<RenderModel>,
    controller: JoinHandle<()>,
    feeds: Vec<JoinHandle<()>>,
}

impl DashboardHandle {
    #[cfg(test)]
    pub fn render(&self) -> watch::Receiver<RenderModel> {
        self.render.clone()
    }

    pub fn latest(&self) -> RenderModel {
        self.render.borrow().clone()
    }

    pub fn send(&self, command: UiCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("dashboard already stopped, command dropped");
        }
    }

    /// Tells the dashboard its tasks may have changed.
    pub fn notify_changed(&self) {
        if self.changes.send(()).is_err() {
            log::debug!("dashboard already stopped, change notice dropped");
        }
    }

    pub fn attach_feed<F: ChangeFeed>(&mut self, mut feed: F) {
        let changes = self.changes.clone();
        self.feeds.push(tokio::spawn(async move {
            while feed.next_change().await.is_some() {
                if changes.send(()).is_err() {
                    break;
                }
            }
        }));
    }

}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        for feed in &self.feeds {
            feed.abort();
        }
        self.controller.abort();
    }
}

/// Starts the controller on the current tokio runtime.
pub fn spawn_dashboard<B, C>(backend: Arc<B>, clock: C, config: DashboardConfig) -> DashboardHandle
where
    B: Backend,
    C: TimeSource,
{
    let state = DashboardState::new(&config, clock.now());
    let (render_tx, render_rx) = watch::channel(state.render());
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (change_tx, change_rx) = mpsc::unbounded_channel();

    let controller = tokio::spawn(run_controller(
        backend, clock, config, state, command_rx, change_rx, render_tx,
    ));

    DashboardHandle {
        commands: command_tx,
        changes: change_tx,
        render: render_rx,
        controller,
        feeds: Vec::new(),
    }
}

async fn run_controller<B, C>(
    backend: Arc<B>,
    clock: C,
    config: DashboardConfig,
    mut state: DashboardState,
    mut commands: mpsc::UnboundedReceiver<UiCommand>,
    mut changes: mpsc::UnboundedReceiver<()>,
    render: watch::Sender<RenderModel>,
) where
    B: Backend,
    C: TimeSource,
{
    // Dropping the set aborts whatever is still in flight
    let mut in_flight: JoinSet<Outcome> = JoinSet::new();
    let mut pending: HashMap<Id, EffectKind> = HashMap::new();
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let effects = state.start();
    perform(&mut in_flight, &mut pending, &backend, &config.worker_id, effects);
    render.send_replace(state.render());

    loop {
        let effects: Vec<Effect> = tokio::select! {
            _ = ticker.tick() => {
                state.on_tick(clock.now());
                Vec::new()
            }
            change = changes.recv() => match change {
                Some(()) => {
                    // Everything already queued is the same request
                    while changes.try_recv().is_ok() {}
                    state.on_change().into_iter().collect()
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(command) => state.on_command(command),
                None => {
                    log::debug!("dashboard handle dropped, stopping controller");
                    break;
                }
            },
            Some(joined) = in_flight.join_next_with_id() => match joined {
                Ok((id, outcome)) => {
                    pending.remove(&id);
                    match outcome {
                        Outcome::Tasks(result) => state.on_tasks(result).into_iter().collect(),
                        Outcome::Earnings(result) => {
                            state.on_earnings(result);
                            Vec::new()
                        }
                        Outcome::Presence(result) => {
                            state.on_presence(result);
                            Vec::new()
                        }
                        Outcome::Completed(task_id, result) => state.on_completion(&task_id, result),
                    }
                }
                Err(e) => match pending.remove(&e.id()) {
                    Some(kind) => {
                        log::error!("dashboard {:?} task failed: {}", kind, e);
                        state.on_fetch_lost(kind).into_iter().collect()
                    }
                    None => {
                        log::error!("untracked dashboard task failed: {}", e);
                        Vec::new()
                    }
                },
            },
        };

        perform(&mut in_flight, &mut pending, &backend, &config.worker_id, effects);
        render.send_replace(state.render());
    }
}

fn perform<B: Backend>(
    in_flight: &mut JoinSet<Outcome>,
    pending: &mut HashMap<Id, EffectKind>,
    backend: &Arc<B>,
    worker_id: &str,
    effects: Vec<Effect>,
) {
    for effect in effects {
        let kind = effect.kind();
        let backend = Arc::clone(backend);
        let worker_id = worker_id.to_string();
        let spawned = match effect {
            Effect::FetchTasks => {
                in_flight.spawn(async move { Outcome::Tasks(backend.fetch_tasks(&worker_id).await) })
            }
            Effect::FetchEarnings => {
                in_flight.spawn(async move { Outcome::Earnings(backend.fetch_total_earned(&worker_id).await) })
            }
            Effect::FetchPresence => {
                in_flight.spawn(async move { Outcome::Presence(backend.fetch_presence(&worker_id).await) })
            }
            Effect::Complete(task) => in_flight.spawn(async move {
                let result = backend.complete_task(&task).await;
                Outcome::Completed(task.id, result)
            }),
        };
        pending.insert(spawned.id(), kind);
    }
}
