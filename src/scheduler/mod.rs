//! Periodic task scheduler.
//!
//! On every tick each registered task that reports itself idle is handed to a
//! bounded pool: a semaphore with `pool_width` permits in front of
//! `spawn_blocking`. A task that finds no free permit is skipped until a later
//! tick; nothing waits for a slot. The tick never waits for task bodies, and
//! shutdown stops the ticking without interrupting bodies already running.

mod config;

pub use config::SchedulerConfig;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::tasks::Task;

pub struct TaskScheduler {
    tasks: Vec<Arc<dyn Task>>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(tasks: Vec<Arc<dyn Task>>, config: SchedulerConfig) -> Self {
        TaskScheduler {
            tasks,
            permits: Arc::new(Semaphore::new(config.pool_width.max(1))),
            config,
        }
    }

    /// Offers every idle task to the pool. Must be called within a tokio
    /// runtime.
    ///
    /// The returned handles complete when the corresponding body finishes;
    /// callers are free to drop them.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for task in self.tasks.iter().filter(|task| task.should_run()) {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!(task = %task.name(), "pool full, skipping");
                continue;
            };
            let task = Arc::clone(task);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let name = task.name().to_string();
                debug!(task = %name, "starting task");
                match tokio::task::spawn_blocking(move || task.run()).await {
                    Ok(Ok(())) => debug!(task = %name, "task finished"),
                    Ok(Err(e)) => error!(task = %name, error = %e, "task failed"),
                    Err(e) => error!(task = %name, error = %e, "task panicked"),
                }
            }));
        }
        handles
    }

    /// Ticks every `period` until `shutdown` is cancelled. The first tick
    /// happens immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            period_secs = self.config.period.as_secs(),
            pool_width = self.config.pool_width,
            tasks = self.tasks.len(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    let offered = self.tick().len();
                    debug!(offered, "tick");
                }
            }
        }
    }
}
