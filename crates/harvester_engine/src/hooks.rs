//! Timing hooks for web transactions and database queries.
//!
//! Framework integrations wrap their request handling or query execution in
//! a span from one of these hooks; finishing the span harvests the timing.
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use agent_logging::{agent_debug, agent_warn};
use harvester_core::{events, QueryTiming, WebRequest, WebTransaction};
use serde::Serialize;

use crate::{Hook, HookError, Instrumentation};

fn harvest_payload<T: Serialize>(instrumentation: Option<&Instrumentation>, event_name: &str, payload: &T) {
    let Some(instrumentation) = instrumentation else {
        agent_debug!("dropping {} event: hook not installed", event_name);
        return;
    };
    match serde_json::to_value(payload) {
        Ok(value) => instrumentation.harvest(event_name, value),
        Err(err) => agent_warn!("failed to encode {} event: {}", event_name, err),
    }
}

/// Produces one `web.request` event per completed transaction.
#[derive(Debug, Default)]
pub struct WebTransactionHook {
    framework: Option<(String, String)>,
    instrumentation: OnceLock<Instrumentation>,
}

impl WebTransactionHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces `name` at `version` in the module registry once installed.
    pub fn for_framework(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            framework: Some((name.into(), version.into())),
            instrumentation: OnceLock::new(),
        }
    }

    /// Call when a request arrives; finish the span when the response ends.
    pub fn begin(&self, request: WebRequest) -> RequestSpan {
        RequestSpan {
            instrumentation: self.instrumentation.get().cloned(),
            started: Instant::now(),
            request,
        }
    }
}

impl Hook for WebTransactionHook {
    fn name(&self) -> &str {
        "web.request"
    }

    fn install(&self, instrumentation: Instrumentation) -> Result<(), HookError> {
        if let Some((name, version)) = &self.framework {
            instrumentation.register_module(name.clone(), version.clone());
        }
        if self.instrumentation.set(instrumentation).is_err() {
            agent_debug!("web.request hook already installed");
        }
        Ok(())
    }
}

/// An in-flight web transaction.
#[derive(Debug)]
pub struct RequestSpan {
    instrumentation: Option<Instrumentation>,
    started: Instant,
    request: WebRequest,
}

impl RequestSpan {
    pub fn request_mut(&mut self) -> &mut WebRequest {
        &mut self.request
    }

    /// Harvests the transaction and returns its duration in milliseconds.
    pub fn finish(self) -> f64 {
        let transaction = WebTransaction {
            duration: millis(self.started.elapsed()),
            request: self.request,
        };
        harvest_payload(self.instrumentation.as_ref(), events::WEB_REQUEST, &transaction);
        transaction.duration
    }
}

/// Produces one `db.query` event per completed query and announces the
/// database client as `"{client} ({dialect})"`.
#[derive(Debug)]
pub struct QueryHook {
    module_name: String,
    version: String,
    instrumentation: OnceLock<Instrumentation>,
}

impl QueryHook {
    pub fn new(client: &str, dialect: &str, version: impl Into<String>) -> Self {
        Self {
            module_name: format!("{client} ({dialect})"),
            version: version.into(),
            instrumentation: OnceLock::new(),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Call right before the query is sent to the database.
    pub fn begin(&self, sql: impl Into<String>) -> QuerySpan {
        QuerySpan {
            instrumentation: self.instrumentation.get().cloned(),
            started: Instant::now(),
            sql: sql.into(),
        }
    }
}

impl Hook for QueryHook {
    fn name(&self) -> &str {
        &self.module_name
    }

    fn install(&self, instrumentation: Instrumentation) -> Result<(), HookError> {
        instrumentation.register_module(self.module_name.clone(), self.version.clone());
        if self.instrumentation.set(instrumentation).is_err() {
            agent_debug!("{} hook already installed", self.module_name);
        }
        Ok(())
    }
}

/// An in-flight database query.
#[derive(Debug)]
pub struct QuerySpan {
    instrumentation: Option<Instrumentation>,
    started: Instant,
    sql: String,
}

impl QuerySpan {
    /// Harvests the query and returns its duration in microseconds.
    pub fn finish(self) -> u64 {
        let timing = QueryTiming {
            duration: micros(self.started.elapsed()),
            query: self.sql,
        };
        harvest_payload(self.instrumentation.as_ref(), events::DB_QUERY, &timing);
        timing.duration
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
