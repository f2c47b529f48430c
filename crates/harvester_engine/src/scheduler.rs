use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agent_logging::{agent_debug, agent_trace, agent_warn};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use harvester_core::{job_interval, ConfigError};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::types::panic_message;
use crate::{HarvestError, ProducerError};

/// Receives every value a harvest job produces.
pub trait HarvestSink: Send + Sync {
    fn harvest(&self, event_name: &str, data: Value);
}

/// What a producer hands back on each tick.
pub enum Yield {
    /// The value is available now.
    Ready(Result<Value, ProducerError>),
    /// The value resolves later; only this job's tick waits for it.
    Deferred(BoxFuture<'static, Result<Value, ProducerError>>),
}

impl Yield {
    pub fn value(value: Value) -> Self {
        Yield::Ready(Ok(value))
    }

    pub fn failed(err: ProducerError) -> Self {
        Yield::Ready(Err(err))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Result<Value, ProducerError>> + Send + 'static,
    {
        Yield::Deferred(Box::pin(future))
    }
}

impl From<Value> for Yield {
    fn from(value: Value) -> Self {
        Yield::value(value)
    }
}

impl std::fmt::Debug for Yield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Yield::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Yield::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

pub type Producer = Arc<dyn Fn() -> Yield + Send + Sync>;

struct Job {
    interval: Duration,
    cancel: CancellationToken,
}

struct Inner {
    sink: Arc<dyn HarvestSink>,
    jobs: Mutex<HashMap<String, Job>>,
    runtime: Handle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, job) in jobs.drain() {
            job.cancel.cancel();
        }
    }
}

/// Named recurring harvest jobs ("crops").
///
/// Every job runs in its own task, so a producer waiting on a deferred value
/// never holds up another job.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Must be called from within a tokio runtime.
    pub fn new(sink: Arc<dyn HarvestSink>) -> Result<Self, HarvestError> {
        let runtime = Handle::try_current().map_err(|_| HarvestError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(Inner {
                sink,
                jobs: Mutex::new(HashMap::new()),
                runtime,
            }),
        })
    }

    /// Runs `producer` every `interval_ms` and harvests its output as `name`.
    ///
    /// An interval of 0 falls back to the default. A live job with the same
    /// name is replaced.
    pub fn start_harvesting<F>(&self, name: &str, interval_ms: u64, producer: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Yield + Send + Sync + 'static,
    {
        self.start_producer(name, interval_ms, Arc::new(producer))
    }

    pub fn start_producer(&self, name: &str, interval_ms: u64, producer: Producer) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyJobName);
        }
        let interval = job_interval(interval_ms);
        let cancel = CancellationToken::new();

        let replaced = {
            let mut jobs = self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            jobs.insert(
                name.to_string(),
                Job {
                    interval,
                    cancel: cancel.clone(),
                },
            )
        };
        if let Some(old) = replaced {
            old.cancel.cancel();
            agent_debug!("replaced harvest job {}", name);
        }

        self.inner.runtime.spawn(run_job(
            name.to_string(),
            interval,
            producer,
            self.inner.sink.clone(),
            cancel,
        ));
        agent_debug!("started harvest job {} every {:?}", name, interval);
        Ok(())
    }

    /// Cancels the job named `name`. Safe to call from the job's own producer.
    pub fn stop_harvesting(&self, name: &str) {
        let removed = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(job) = removed {
            job.cancel.cancel();
            agent_debug!("stopped harvest job {}", name);
        }
    }

    pub fn stop_all(&self) {
        let jobs: Vec<(String, Job)> = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (name, job) in jobs {
            job.cancel.cancel();
            agent_debug!("stopped harvest job {}", name);
        }
    }

    pub fn is_harvesting(&self, name: &str) -> bool {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|job| job.interval)
    }

    /// Names of the live jobs, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

async fn run_job(
    name: String,
    period: Duration,
    producer: Producer,
    sink: Arc<dyn HarvestSink>,
    cancel: CancellationToken,
) {
    // First harvest happens one full period after the job starts.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = run_tick(&producer) => outcome,
        };
        // The producer may have stopped or replaced this very job.
        if cancel.is_cancelled() {
            break;
        }

        match outcome {
            Ok(value) => {
                agent_trace!("harvest job {} produced a value", name);
                sink.harvest(&name, value);
            }
            Err(err) => agent_warn!("harvest job {} skipped a tick: {}", name, err),
        }
    }
}

async fn run_tick(producer: &Producer) -> Result<Value, ProducerError> {
    let produced = catch_unwind(AssertUnwindSafe(|| (**producer)()))
        .map_err(|payload| ProducerError::Panicked(panic_message(payload.as_ref())))?;

    match produced {
        Yield::Ready(result) => result,
        Yield::Deferred(future) => AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .map_err(|payload| ProducerError::Panicked(panic_message(payload.as_ref())))?,
    }
}
