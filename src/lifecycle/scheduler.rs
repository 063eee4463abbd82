//! Coarse periodic maintenance.
//!
//! # Responsibilities
//! - Run registered tasks at fixed intervals
//! - Stop on the shutdown broadcast
//!
//! # Design Decisions
//! - One tick drives all tasks; a task runs on the first tick after it is due
//! - Tasks are synchronous and short (rule sorting, small file writes)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::policy::UserProfile;

struct ScheduledTask {
    name: &'static str,
    every: Duration,
    next_run: Instant,
    run: Box<dyn FnMut() + Send>,
}

/// Interval-driven runner for maintenance tasks.
pub struct Scheduler {
    tick: Duration,
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            tasks: Vec::new(),
        }
    }

    /// Register `run` to execute every `every`, first after one interval.
    pub fn every<F>(&mut self, name: &'static str, every: Duration, run: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.tasks.push(ScheduledTask {
            name,
            every,
            next_run: Instant::now() + every,
            run: Box::new(run),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Execute every task due at `now`. Returns how many ran.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        for task in self.tasks.iter_mut().filter(|t| t.next_run <= now) {
            tracing::debug!(task = task.name, "Running scheduled task");
            (task.run)();
            task.next_run = now + task.every;
            ran += 1;
        }
        ran
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            tick_secs = self.tick.as_secs(),
            tasks = self.tasks.len(),
            "Scheduler starting"
        );

        let mut ticker = time::interval(self.tick);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_due(Instant::now());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Re-sort the profile's rule lists and persist them when a directory is set.
pub fn rule_maintenance(profile: Arc<UserProfile>, dir: Option<PathBuf>) -> impl FnMut() + Send {
    move || {
        let resorted = profile.rules().refresh_all();
        tracing::debug!(lists = resorted, "Rule lists re-sorted");
        if let Some(dir) = &dir {
            if let Err(e) = profile.rules().save_dir(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to save rule lists");
            }
        }
    }
}
