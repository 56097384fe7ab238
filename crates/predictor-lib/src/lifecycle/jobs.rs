//! Interval job scheduling with misfire handling
//!
//! Each job gets its own driver task. The driver awaits the job inline, so a
//! job never overlaps with itself; firings missed while it ran (or while the
//! process stalled) are coalesced into one run if the most recent of them is
//! still within the grace window, and skipped otherwise.

use crate::error::Result;
use crate::observability::PredictorMetrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What to do for a firing that was due at `scheduled`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringPlan {
    /// Run the job now
    pub run: bool,
    /// Firings after `scheduled` that were also due and are folded into this one
    pub coalesced: u32,
    pub next: DateTime<Utc>,
}

/// Decide a due firing given the current time
pub fn plan_firing(
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: chrono::Duration,
    grace: chrono::Duration,
) -> FiringPlan {
    let step = interval.num_milliseconds().max(1);
    let lateness = (now - scheduled).num_milliseconds().max(0);
    let coalesced = lateness / step;
    let latest_due = scheduled + chrono::Duration::milliseconds(coalesced * step);

    FiringPlan {
        run: now - latest_due <= grace,
        coalesced: coalesced as u32,
        next: scheduled + chrono::Duration::milliseconds((coalesced + 1) * step),
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    pub interval: Duration,
    pub misfire_grace: Duration,
}

/// Observable state of one scheduled job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub interval_secs: u64,
    pub next_run_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
    pub runs: u64,
    pub failures: u64,
    pub skipped: u64,
}

/// Scheduler lifecycle as reported to health checks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerStatus {
    NotInitialized,
    Stopped,
    Running { jobs: Vec<JobStatus> },
}

/// Runs interval jobs until shut down
pub struct JobScheduler {
    jobs: Arc<DashMap<String, JobStatus>>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    metrics: PredictorMetrics,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            jobs: Arc::new(DashMap::new()),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            metrics: PredictorMetrics::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Schedule `job` every `spec.interval`, first firing one interval from now
    pub fn add_interval_job<F, Fut>(&self, spec: JobSpec, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let interval = chrono::Duration::from_std(spec.interval)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let grace =
            chrono::Duration::from_std(spec.misfire_grace).unwrap_or_else(|_| chrono::Duration::zero());

        let status = JobStatus {
            id: spec.id.clone(),
            name: spec.name.clone(),
            interval_secs: spec.interval.as_secs(),
            next_run_time: Utc::now() + interval,
            last_run_time: None,
            runs: 0,
            failures: 0,
            skipped: 0,
        };
        self.jobs.insert(spec.id.clone(), status);

        info!(
            job_id = %spec.id,
            interval_secs = spec.interval.as_secs(),
            grace_secs = spec.misfire_grace.as_secs(),
            "Scheduled interval job"
        );

        let driver = JobDriver {
            spec,
            interval,
            grace,
            jobs: self.jobs.clone(),
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(driver.run(job, self.shutdown_tx.subscribe()));

        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles.push(handle);
    }

    /// Snapshot of every job, ordered by id
    pub fn jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub fn status(&self) -> SchedulerStatus {
        if self.is_running() {
            SchedulerStatus::Running { jobs: self.jobs() }
        } else {
            SchedulerStatus::Stopped
        }
    }

    /// Stop every driver and wait for in-flight runs to finish
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job driver ended abnormally");
            }
        }
        info!("Job scheduler stopped");
    }
}

struct JobDriver {
    spec: JobSpec,
    interval: chrono::Duration,
    grace: chrono::Duration,
    jobs: Arc<DashMap<String, JobStatus>>,
    metrics: PredictorMetrics,
}

impl JobDriver {
    async fn run<F, Fut>(self, job: F, mut shutdown: broadcast::Receiver<()>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Timing runs on the tokio clock; wall time only labels the firings
        let mut due_at = Instant::now() + self.spec.interval;
        let mut due_wall = Utc::now() + self.interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(due_at) => {}
                _ = shutdown.recv() => {
                    debug!(job_id = %self.spec.id, "Job driver shutting down");
                    break;
                }
            }

            let late = Instant::now().saturating_duration_since(due_at);
            let now_wall = due_wall + chrono::Duration::from_std(late).unwrap_or_else(|_| chrono::Duration::zero());
            let plan = plan_firing(due_wall, now_wall, self.interval, self.grace);

            if plan.coalesced > 0 {
                info!(
                    job_id = %self.spec.id,
                    coalesced = plan.coalesced,
                    "Coalescing missed firings"
                );
            }

            if plan.run {
                self.update(|s| s.last_run_time = Some(now_wall));
                match job().await {
                    Ok(()) => {
                        self.update(|s| s.runs += 1);
                        debug!(job_id = %self.spec.id, "Job run finished");
                    }
                    Err(e) => {
                        self.update(|s| {
                            s.runs += 1;
                            s.failures += 1;
                        });
                        self.metrics.inc_job_failures(&self.spec.id);
                        error!(
                            job_id = %self.spec.id,
                            error_code = e.error_code(),
                            error = %e,
                            "Job run failed"
                        );
                    }
                }
            } else {
                self.update(|s| s.skipped += 1);
                warn!(
                    job_id = %self.spec.id,
                    late_secs = (now_wall - due_wall).num_seconds(),
                    grace_secs = self.grace.num_seconds(),
                    "Skipping firing past its misfire grace time"
                );
            }

            let ahead = (plan.next - due_wall)
                .to_std()
                .unwrap_or(self.spec.interval);
            due_at += ahead;
            due_wall = plan.next;
            self.update(|s| s.next_run_time = plan.next);
        }
    }

    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        if let Some(mut status) = self.jobs.get_mut(&self.spec.id) {
            f(status.value_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PredictorError;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_on_time_firing_runs() {
        let plan = plan_firing(at(100), at(100), chrono::Duration::seconds(60), chrono::Duration::seconds(5));
        assert!(plan.run);
        assert_eq!(plan.coalesced, 0);
        assert_eq!(plan.next, at(160));
    }

    #[test]
    fn test_late_within_grace_runs() {
        let plan = plan_firing(at(100), at(104), chrono::Duration::seconds(60), chrono::Duration::seconds(5));
        assert!(plan.run);
        assert_eq!(plan.next, at(160));
    }

    #[test]
    fn test_late_past_grace_is_skipped() {
        let plan = plan_firing(at(100), at(120), chrono::Duration::seconds(60), chrono::Duration::seconds(5));
        assert!(!plan.run);
        assert_eq!(plan.next, at(160));
    }

    #[test]
    fn test_missed_firings_coalesce() {
        // Due at 100, 160, 220; woke at 223: one run for all three
        let plan = plan_firing(at(100), at(223), chrono::Duration::seconds(60), chrono::Duration::seconds(5));
        assert!(plan.run);
        assert_eq!(plan.coalesced, 2);
        assert_eq!(plan.next, at(280));
    }

    #[test]
    fn test_early_wakeup_counts_as_on_time() {
        let plan = plan_firing(at(100), at(99), chrono::Duration::seconds(60), chrono::Duration::zero());
        assert!(plan.run);
        assert_eq!(plan.next, at(160));
    }

    fn spec(id: &str, interval_secs: u64, grace_secs: u64) -> JobSpec {
        JobSpec {
            id: id.to_string(),
            name: id.to_string(),
            interval: Duration::from_secs(interval_secs),
            misfire_grace: Duration::from_secs(grace_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_every_interval() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        scheduler.add_interval_job(spec("tick", 10, 1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let jobs = scheduler.jobs();
        assert_eq!(jobs[0].runs, 3);
        scheduler.shutdown().await;
        assert_eq!(scheduler.status(), SchedulerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_run_never_overlaps_and_skips_stale_firings() {
        let scheduler = JobScheduler::new();
        let active = Arc::new(AtomicU32::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let (a, o) = (active.clone(), overlapped.clone());

        scheduler.add_interval_job(spec("slow", 10, 1), move || {
            let (a, o) = (a.clone(), o.clone());
            async move {
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_secs(25)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        // Runs at 10 (until 35); 20 and 30 are missed past grace; next run at 40
        tokio::time::sleep(Duration::from_secs(41)).await;
        let job = scheduler.jobs().remove(0);
        assert!(!overlapped.load(Ordering::SeqCst));
        assert_eq!(job.runs, 1);
        assert_eq!(job.skipped, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_schedule() {
        let scheduler = JobScheduler::new();
        scheduler.add_interval_job(spec("failing", 5, 1), || async {
            Err(PredictorError::DatabaseConnectionError {
                message: "down".to_string(),
            })
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        let job = scheduler.jobs().remove(0);
        assert_eq!(job.runs, 3);
        assert_eq!(job.failures, 3);
        scheduler.shutdown().await;
    }
}
