use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

use super::ChangeFeed;
use crate::database::Database;

fn quiet_interval(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Says "maybe changed" every `period`, whether or not anything did.
pub struct PollFeed {
    ticker: Interval,
    started: bool,
}

impl PollFeed {
    pub fn new(period: Duration) -> Self {
        PollFeed {
            ticker: quiet_interval(period),
            started: false,
        }
    }
}

impl ChangeFeed for PollFeed {
    async fn next_change(&mut self) -> Option<()> {
        if !self.started {
            // The first tick fires immediately; the dashboard already fetches on start
            self.ticker.tick().await;
            self.started = true;
        }
        self.ticker.tick().await;
        Some(())
    }
}

/// Watches the local store's `PRAGMA data_version`, which moves whenever
/// another process commits to the same database file.
pub struct DataVersionFeed {
    db: Database,
    ticker: Interval,
    last_version: Option<i64>,
}

impl DataVersionFeed {
    pub fn new(db: Database, period: Duration) -> Self {
        DataVersionFeed {
            db,
            ticker: quiet_interval(period),
            last_version: None,
        }
    }
}

impl ChangeFeed for DataVersionFeed {
    async fn next_change(&mut self) -> Option<()> {
        loop {
            self.ticker.tick().await;
            let version = match self.db.data_version() {
                Ok(version) => version,
                Err(e) => {
                    log::warn!("data_version check failed: {}", e);
                    continue;
                }
            };
            match self.last_version.replace(version) {
                Some(previous) if previous != version => return Some(()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewTask;
    use chrono::Utc;

    #[tokio::test(start_paused = true)]
    async fn poll_feed_skips_the_immediate_tick() {
        let mut feed = PollFeed::new(Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        assert_eq!(feed.next_change().await, Some(()));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(feed.next_change().await, Some(()));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn data_version_feed_fires_on_foreign_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dash.db");
        let watched = Database::open(&path).unwrap();
        let writer = Database::open(&path).unwrap();
        let mut feed = DataVersionFeed::new(watched, Duration::from_millis(10));

        let waiter = tokio::spawn(async move { feed.next_change().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer
            .add_task(&NewTask {
                worker_id: "w1".to_string(),
                title: "new".to_string(),
                due_date: Utc::now(),
                ..Default::default()
            })
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), waiter).await;
        assert_eq!(fired.unwrap().unwrap(), Some(()));
    }
}
