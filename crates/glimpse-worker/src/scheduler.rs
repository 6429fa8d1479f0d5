//! Per-source recurring jobs and the singleton background jobs.
//!
//! Every source gets one job keyed by its name; registering a source again
//! replaces its job. Start offsets are staggered so that the fleet does not
//! capture in lockstep. Each tick waits for a pool permit and runs the cycle
//! in its own task, so replacing a job never cancels a cycle in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use glimpse_models::Source;
use rand::seq::SliceRandom;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::cycle::CaptureCycleExecutor;
use crate::error::WorkerResult;
use crate::metrics;
use crate::store::ConfigChanges;

/// Interval thresholds (seconds) past which the stagger base doubles.
const STAGGER_THRESHOLDS: [u64; 4] = [120, 240, 360, 720];

/// Base delay unit for a source with the given interval.
pub fn stagger_base(interval_secs: u64, base: Duration) -> Duration {
    STAGGER_THRESHOLDS
        .iter()
        .filter(|t| interval_secs > **t)
        .fold(base, |acc, _| acc * 2)
}

/// Start offset of the source at `rank` among `count` shuffled sources.
pub fn stagger_offset(interval_secs: u64, rank: usize, count: usize, base: Duration) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    stagger_base(interval_secs, base).mul_f64(rank as f64 / count as f64)
}

/// Time from `now` to the next multiple of `period` since the epoch.
pub fn until_next_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let into = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - into) as u64)
}

struct Job {
    interval_secs: u64,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    executor: Arc<CaptureCycleExecutor>,
    permits: Arc<Semaphore>,
    jobs: Mutex<HashMap<String, Job>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stagger_base: Duration,
    full_crawl_delay: Duration,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(executor: Arc<CaptureCycleExecutor>, config: &WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
            jobs: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            stagger_base: config.stagger_base,
            full_crawl_delay: config.full_crawl_delay,
            shutdown,
        }
    }

    pub fn executor(&self) -> &Arc<CaptureCycleExecutor> {
        &self.executor
    }

    /// Shuffle `sources` and (re)register a staggered job for each.
    ///
    /// Sources with invalid configuration are logged and skipped. Returns the
    /// number of jobs registered.
    pub fn configure(&self, sources: impl IntoIterator<Item = Source>) -> usize {
        let mut sources: Vec<Source> = sources.into_iter().collect();
        sources.shuffle(&mut rand::rng());

        let count = sources.len();
        let mut scheduled = 0;
        for (rank, source) in sources.iter().enumerate() {
            if let Err(e) = source.validate_config() {
                warn!(source = %source.name, "Not scheduling source: {}", e);
                metrics::record_cycle_skipped("invalid_config");
                continue;
            }
            let offset = stagger_offset(source.interval_secs(), rank, count, self.stagger_base);
            self.upsert(source, offset);
            scheduled += 1;
        }
        info!("Scheduled {} of {} sources", scheduled, count);
        scheduled
    }

    /// Register the job for `source`, replacing any existing one.
    pub fn upsert(&self, source: &Source, delay: Duration) {
        let interval_secs = source.interval_secs().max(1);
        let handle = tokio::spawn(source_job(
            Arc::clone(&self.executor),
            Arc::clone(&self.permits),
            source.name.clone(),
            delay,
            Duration::from_secs(interval_secs),
        ));

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = jobs.insert(source.name.clone(), Job { interval_secs, handle }) {
            old.handle.abort();
            debug!(source = %source.name, "Replaced job");
        }
        debug!(
            source = %source.name,
            "Job every {}s starting in {:.1}s",
            interval_secs,
            delay.as_secs_f64()
        );
    }

    /// Drop the job for `name`. Returns whether one existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.remove(name) {
            Some(job) => {
                job.handle.abort();
                info!(source = %name, "Removed job");
                true
            }
            None => false,
        }
    }

    /// Reschedule changed sources and drop removed ones.
    pub async fn apply_changes(&self, changes: &ConfigChanges) -> WorkerResult<()> {
        for name in &changes.removed {
            self.remove(name);
        }

        let mut changed = Vec::with_capacity(changes.changed.len());
        for name in &changes.changed {
            match self.executor.store().get(name).await? {
                Some(source) => changed.push(source),
                None => {
                    self.remove(name);
                }
            }
        }
        if !changed.is_empty() {
            self.configure(changed);
        }
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Interval of the registered job for `name`, in seconds.
    pub fn job_interval(&self, name: &str) -> Option<u64> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|job| job.interval_secs)
    }

    /// Run every source once, sequentially, after the full-crawl delay.
    pub fn spawn_full_crawl(&self) {
        let executor = Arc::clone(&self.executor);
        let permits = Arc::clone(&self.permits);
        let delay = self.full_crawl_delay;
        self.spawn_guarded("full_crawl", async move {
            tokio::time::sleep(delay).await;
            let names: Vec<String> = match executor.store().list().await {
                Ok(sources) => sources.into_keys().collect(),
                Err(e) => {
                    warn!("Full crawl cannot list sources: {}", e);
                    return;
                }
            };
            info!("Full crawl over {} sources", names.len());
            for name in names {
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                // Failures are logged by the executor.
                let _ = executor.run(&name).await;
            }
            info!("Full crawl complete");
        });
    }

    /// Run `task` after `first_delay`, then every `period`.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, first_delay: Duration, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_guarded(name, async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!(job = name, "Running periodic job");
                task().await;
            }
        });
    }

    /// Run `task` at every wall-clock multiple of `period` (UTC), and once
    /// immediately when `eager` is set.
    pub fn spawn_aligned<F, Fut>(&self, name: &'static str, period: Duration, eager: bool, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_guarded(name, async move {
            if eager {
                task().await;
            }
            loop {
                tokio::time::sleep(until_next_boundary(Utc::now(), period)).await;
                debug!(job = name, "Running aligned job");
                task().await;
            }
        });
    }

    /// Spawn a background job that stops on shutdown.
    fn spawn_guarded<Fut>(&self, name: &'static str, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    debug!(job = name, "Background job stopped");
                }
                _ = job => {}
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Stop all jobs. Cycles already running finish on their own.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, job)| job)
            .collect();
        for job in jobs {
            job.handle.abort();
        }
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
        info!("Scheduler stopped");
    }
}

/// Recurring job loop for one source.
async fn source_job(
    executor: Arc<CaptureCycleExecutor>,
    permits: Arc<Semaphore>,
    name: String,
    delay: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            return;
        };
        let executor = Arc::clone(&executor);
        let name = name.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Ok(None) = executor.run(&name).await {
                debug!(source = %name, "Tick skipped, previous cycle still running");
            }
        });
    }
}
