use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{FilterMode, SortMode, Task};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub total_in_progress_sum: f64,
    pub total_earned: f64,
    pub current_tasks_count: usize,
    pub completed_today_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// Tasks matching the active filter, in the active sort order.
    pub visible: Vec<Task>,
    /// Every non-completed task, independent of the filter.
    pub current: Vec<Task>,
    /// Every completed task, independent of the filter.
    pub completed: Vec<Task>,
    pub metrics: Metrics,
}

pub fn matches_filter(task: &Task, filter: FilterMode) -> bool {
    match filter {
        FilterMode::All => true,
        FilterMode::Current => !task.is_completed(),
        FilterMode::Completed => task.is_completed(),
    }
}

/// Stable sort in place. Undated tasks go last under `Deadline`.
pub fn sort_tasks(tasks: &mut [Task], sort: SortMode) {
    match sort {
        SortMode::Deadline => tasks.sort_by(|a, b| match (a.due_date, b.due_date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }),
        SortMode::Salary => tasks.sort_by(|a, b| b.salary_or_zero().total_cmp(&a.salary_or_zero())),
    }
}

pub fn completed_on_day(task: &Task, now: DateTime<Utc>, tz: Tz) -> bool {
    if !task.is_completed() {
        return false;
    }
    match task.completed_at {
        Some(completed_at) => {
            completed_at.with_timezone(&tz).date_naive() == now.with_timezone(&tz).date_naive()
        }
        None => false,
    }
}

pub fn aggregate(
    tasks: &[Task],
    filter: FilterMode,
    sort: SortMode,
    now: DateTime<Utc>,
    tz: Tz,
    total_earned: f64,
) -> Aggregation {
    let mut visible: Vec<Task> = tasks
        .iter()
        .filter(|task| matches_filter(task, filter))
        .cloned()
        .collect();
    sort_tasks(&mut visible, sort);

    let (completed, current): (Vec<Task>, Vec<Task>) =
        tasks.iter().cloned().partition(|task| task.is_completed());

    let metrics = Metrics {
        total_in_progress_sum: current.iter().map(Task::salary_or_zero).sum(),
        total_earned,
        current_tasks_count: current.len(),
        completed_today_count: completed
            .iter()
            .filter(|task| completed_on_day(task, now, tz))
            .count(),
    };

    Aggregation {
        visible,
        current,
        completed,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use chrono::{Duration, TimeZone};

    const MOSCOW: Tz = chrono_tz::Europe::Moscow;

    fn now() -> DateTime<Utc> {
        // 23:30 in Moscow
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 30, 0).unwrap()
    }

    fn task(id: &str, due_offset: i64, salary: Option<f64>, status: Option<TaskStatus>) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {}", id),
            description: None,
            salary,
            due_date: Some(now() + Duration::seconds(due_offset)),
            priority: None,
            status,
            completed_at: None,
            order: None,
        }
    }

    fn done(id: &str, completed_at: DateTime<Utc>) -> Task {
        let mut t = task(id, -60, Some(50.0), Some(TaskStatus::Completed));
        t.completed_at = Some(completed_at);
        t
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let agg = aggregate(&[], FilterMode::Current, SortMode::Deadline, now(), MOSCOW, 0.0);
        assert!(agg.visible.is_empty());
        assert!(agg.current.is_empty());
        assert!(agg.completed.is_empty());
        assert_eq!(agg.metrics, Metrics::default());
    }

    #[test]
    fn current_filter_excludes_completed_for_every_sort() {
        let tasks = vec![
            task("a", 100, Some(10.0), Some(TaskStatus::Pending)),
            task("b", 50, Some(20.0), Some(TaskStatus::Completed)),
            task("c", 10, None, None),
            task("d", 70, Some(5.0), Some(TaskStatus::InProgress)),
        ];
        for sort in [SortMode::Deadline, SortMode::Salary] {
            let agg = aggregate(&tasks, FilterMode::Current, sort, now(), MOSCOW, 0.0);
            assert!(agg.visible.iter().all(|t| !t.is_completed()));
            assert_eq!(agg.visible.len(), 3);
        }
        let agg = aggregate(&tasks, FilterMode::Completed, SortMode::Deadline, now(), MOSCOW, 0.0);
        assert_eq!(ids(&agg.visible), vec!["b"]);
        let agg = aggregate(&tasks, FilterMode::All, SortMode::Deadline, now(), MOSCOW, 0.0);
        assert_eq!(ids(&agg.visible), vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn subsets_ignore_filter() {
        let tasks = vec![
            task("a", 100, Some(10.0), Some(TaskStatus::Pending)),
            task("b", 50, Some(20.0), Some(TaskStatus::Completed)),
        ];
        let agg = aggregate(&tasks, FilterMode::Completed, SortMode::Deadline, now(), MOSCOW, 0.0);
        assert_eq!(ids(&agg.current), vec!["a"]);
        assert_eq!(ids(&agg.completed), vec!["b"]);
    }

    #[test]
    fn deadline_sort_is_ascending_and_stable() {
        let mut undated = task("u", 0, None, None);
        undated.due_date = None;
        let tasks = vec![
            undated,
            task("late", 500, None, None),
            task("tie1", 100, None, None),
            task("early", -100, None, None),
            task("tie2", 100, None, None),
        ];
        let agg = aggregate(&tasks, FilterMode::All, SortMode::Deadline, now(), MOSCOW, 0.0);
        assert_eq!(ids(&agg.visible), vec!["early", "tie1", "tie2", "late", "u"]);
    }

    #[test]
    fn salary_sort_is_descending_and_stable() {
        let tasks = vec![
            task("none", 0, None, None),
            task("mid1", 0, Some(100.0), None),
            task("top", 0, Some(500.0), None),
            task("mid2", 0, Some(100.0), None),
            task("zero", 0, Some(0.0), None),
        ];
        let agg = aggregate(&tasks, FilterMode::All, SortMode::Salary, now(), MOSCOW, 0.0);
        assert_eq!(ids(&agg.visible), vec!["top", "mid1", "mid2", "none", "zero"]);
        let salaries: Vec<f64> = agg.visible.iter().map(Task::salary_or_zero).collect();
        assert!(salaries.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn in_progress_sum_covers_non_completed() {
        let tasks = vec![
            task("a", 0, Some(200.0), Some(TaskStatus::Pending)),
            task("b", 0, Some(100.0), Some(TaskStatus::InProgress)),
            task("c", 0, None, None),
            task("d", 0, Some(999.0), Some(TaskStatus::Completed)),
        ];
        let agg = aggregate(&tasks, FilterMode::Current, SortMode::Deadline, now(), MOSCOW, 1234.0);
        assert_eq!(agg.metrics.total_in_progress_sum, 300.0);
        assert_eq!(agg.metrics.current_tasks_count, 3);
        assert_eq!(agg.metrics.total_earned, 1234.0);
    }

    #[test]
    fn completed_today_uses_reference_zone() {
        let tasks = vec![
            // 00:10 Moscow, same day as now
            done("today_early", Utc.with_ymd_and_hms(2024, 4, 30, 21, 10, 0).unwrap()),
            // 23:50 Moscow previous day, though the same UTC date as one above
            done("yesterday", Utc.with_ymd_and_hms(2024, 4, 30, 20, 50, 0).unwrap()),
            done("just_now", now()),
            // 00:10 Moscow next day while still May 1st in UTC
            done("tomorrow", Utc.with_ymd_and_hms(2024, 5, 1, 21, 10, 0).unwrap()),
        ];
        let agg = aggregate(&tasks, FilterMode::All, SortMode::Deadline, now(), MOSCOW, 0.0);
        assert_eq!(agg.metrics.completed_today_count, 2);

        let mut missing = task("no_stamp", 0, None, Some(TaskStatus::Completed));
        missing.completed_at = None;
        assert!(!completed_on_day(&missing, now(), MOSCOW));

        let mut stray = task("stray", 0, None, Some(TaskStatus::Pending));
        stray.completed_at = Some(now());
        assert!(!completed_on_day(&stray, now(), MOSCOW));
    }
}
