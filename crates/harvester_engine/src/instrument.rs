use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use agent_logging::{agent_error, agent_info};
use harvester_core::ModuleRegistry;
use serde_json::Value;

use crate::types::panic_message;
use crate::{HarvestSink, HookError};

/// The narrow capability handed to hooks: harvest events and announce
/// component versions. Nothing else of the agent is reachable through it.
#[derive(Clone)]
pub struct Instrumentation {
    sink: Arc<dyn HarvestSink>,
    modules: ModuleRegistry,
}

impl Instrumentation {
    pub fn new(sink: Arc<dyn HarvestSink>, modules: ModuleRegistry) -> Self {
        Self { sink, modules }
    }

    pub fn harvest(&self, event_name: &str, payload: Value) {
        self.sink.harvest(event_name, payload);
    }

    pub fn register_module(&self, name: impl Into<String>, version: impl Into<String>) {
        self.modules.register_module(name, version);
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("modules", &self.modules)
            .finish_non_exhaustive()
    }
}

/// An integration that produces events for the harvester, installed
/// explicitly by the host application.
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    fn install(&self, instrumentation: Instrumentation) -> Result<(), HookError>;
}

/// Installs one hook, turning a panic into a [`HookError`].
pub(crate) fn install_isolated(hook: &dyn Hook, instrumentation: Instrumentation) -> Result<(), HookError> {
    let name = hook.name().to_string();
    let result = catch_unwind(AssertUnwindSafe(|| hook.install(instrumentation)))
        .unwrap_or_else(|payload| {
            Err(HookError::Panicked {
                hook: name.clone(),
                reason: panic_message(payload.as_ref()),
            })
        });

    match &result {
        Ok(()) => agent_info!("installed hook {}", name),
        Err(err) => agent_error!("{}", err),
    }
    result
}
