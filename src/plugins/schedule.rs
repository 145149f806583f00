//! Scheduled jobs owned by a plugin
//!
//! Each job runs on its own tokio task. Cancelling flips a watch signal that
//! the task checks while waiting for the next firing, so a job body that is
//! already running is never interrupted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::errors::{HostError, HostResult};

/// Scheduled job body
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, HostResult<()>> + Send + Sync>;

/// When a job fires
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron {
        expr: String,
        schedule: Box<cron::Schedule>,
    },
    Every(Duration),
}

impl Trigger {
    /// Parses a 6 or 7 field cron expression (seconds first).
    pub fn cron(expr: &str) -> HostResult<Self> {
        cron::Schedule::from_str(expr)
            .map(|schedule| Trigger::Cron {
                expr: expr.to_string(),
                schedule: Box::new(schedule),
            })
            .map_err(|e| HostError::InvalidSchedule {
                expr: expr.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn every(period: Duration) -> HostResult<Self> {
        if period.is_zero() {
            return Err(HostError::InvalidSchedule {
                expr: format!("{period:?}"),
                reason: "period must be non-zero".to_string(),
            });
        }
        Ok(Trigger::Every(period))
    }

    /// Time until the next firing; `None` once a cron schedule is exhausted.
    pub fn next_delay(&self) -> Option<Duration> {
        match self {
            Trigger::Every(period) => Some(*period),
            Trigger::Cron { schedule, .. } => {
                let now = Utc::now();
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron { expr, .. } => format!("cron({expr})"),
            Trigger::Every(period) => format!("every({}ms)", period.as_millis()),
        }
    }
}

/// Starts a job's timer task and hands back its handle.
///
/// Plugins loaded from a shared library carry a spawner built by the host,
/// so their jobs land on the host's runtime rather than on the library's
/// own copy of it.
pub type JobSpawner = Arc<dyn Fn(&str, Trigger, JobFn) -> HostResult<ScheduledJob> + Send + Sync>;

/// Anything a running job must outlive, such as the library its body lives in
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

// Field order matters: the job body is dropped before what keeps it valid.
struct JobRunner {
    job: JobFn,
    _keep_alive: Option<KeepAlive>,
}

impl JobRunner {
    async fn run(self, trigger: Trigger, mut stopped: watch::Receiver<bool>, label: String) {
        loop {
            let Some(delay) = trigger.next_delay() else {
                debug!(job = %label, "Schedule exhausted");
                break;
            };

            tokio::select! {
                biased;
                _ = stopped.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if *stopped.borrow() {
                break;
            }

            match AssertUnwindSafe((self.job)()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(job = %label, error = %e, "Scheduled job failed"),
                Err(_) => warn!(job = %label, "Scheduled job panicked"),
            }
        }
        debug!(job = %label, "Scheduled job stopped");
    }
}

/// Handle to one running job
#[derive(Debug)]
pub struct ScheduledJob {
    id: Uuid,
    label: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    /// Starts the job's timer task on the current tokio runtime. Fails
    /// outside of one.
    pub fn spawn(owner: &str, trigger: Trigger, job: JobFn) -> HostResult<Self> {
        Self::spawn_holding(owner, trigger, job, None)
    }

    /// Like [`ScheduledJob::spawn`], keeping `keep_alive` until the task has
    /// dropped `job`.
    pub fn spawn_holding(owner: &str, trigger: Trigger, job: JobFn, keep_alive: Option<KeepAlive>) -> HostResult<Self> {
        let label = format!("{owner}:{}", trigger.describe());
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| HostError::NoRuntime {
            job: label.clone(),
            reason: e.to_string(),
        })?;

        let (stop, stopped) = watch::channel(false);
        let runner = JobRunner {
            job,
            _keep_alive: keep_alive,
        };
        let handle = runtime.spawn(runner.run(trigger, stopped, label.clone()));

        Ok(Self {
            id: Uuid::new_v4(),
            label,
            stop,
            handle,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Prevents future firings; an invocation in progress runs to completion.
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Ownership list of a plugin's jobs
#[derive(Default)]
pub struct ScheduleManager {
    jobs: Vec<ScheduledJob>,
}

impl ScheduleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, job: ScheduledJob) -> Uuid {
        let id = job.id();
        self.jobs.push(job);
        id
    }

    /// Cancels and forgets every job. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.jobs.len();
        for job in self.jobs.drain(..) {
            job.cancel();
        }
        count
    }

    pub fn cancel(&mut self, id: Uuid) -> bool {
        match self.jobs.iter().position(|j| j.id() == id) {
            Some(index) => {
                self.jobs.remove(index).cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.label().to_string()).collect()
    }
}

impl Drop for ScheduleManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
