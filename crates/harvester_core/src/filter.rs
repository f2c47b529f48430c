use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agent_logging::agent_warn;
use serde_json::Value;

use crate::ConfigError;

/// Priority assigned to filters registered without one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// A transform applied to harvested data before it leaves the agent.
///
/// Receives the current data plus the extra arguments given to
/// [`FilterPipeline::apply_filters`]. Returning `None` leaves the data as it
/// was before this filter ran.
pub type FilterFn = dyn Fn(Value, &[Value]) -> Option<Value> + Send + Sync;

/// Shared handle to a filter. The same handle is used to remove it again.
pub type FilterCallback = Arc<FilterFn>;

/// Wraps a closure into a [`FilterCallback`].
pub fn filter<F>(callback: F) -> FilterCallback
where
    F: Fn(Value, &[Value]) -> Option<Value> + Send + Sync + 'static,
{
    Arc::new(callback)
}

#[derive(Clone)]
struct FilterEntry {
    callback: FilterCallback,
    priority: i32,
}

/// Named chains of transforms, each kept in ascending priority order.
#[derive(Default)]
pub struct FilterPipeline {
    chains: Mutex<HashMap<String, Vec<FilterEntry>>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `callback` to the chain for `name`. Lower priorities run first;
    /// equal priorities run in registration order.
    pub fn add_filter(
        &self,
        name: &str,
        callback: FilterCallback,
        priority: Option<i32>,
    ) -> Result<(), ConfigError> {
        validate_name(name)?;
        let mut chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
        let chain = chains.entry(name.to_string()).or_default();
        chain.push(FilterEntry {
            callback,
            priority: priority.unwrap_or(DEFAULT_PRIORITY),
        });
        // `sort_by_key` is stable, which keeps registration order for ties.
        chain.sort_by_key(|entry| entry.priority);
        Ok(())
    }

    /// Removes every registration of `callback` from the chain for `name` and
    /// returns how many were removed.
    pub fn remove_filter(&self, name: &str, callback: &FilterCallback) -> Result<usize, ConfigError> {
        validate_name(name)?;
        let mut chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(chain) = chains.get_mut(name) else {
            return Ok(0);
        };
        let before = chain.len();
        chain.retain(|entry| !Arc::ptr_eq(&entry.callback, callback));
        let removed = before - chain.len();
        if chain.is_empty() {
            chains.remove(name);
        }
        Ok(removed)
    }

    /// Threads `data` through the chain for `name`. Returns `data` unchanged
    /// when no chain is registered.
    pub fn apply_filters(&self, name: &str, data: Value, extra: &[Value]) -> Value {
        // Snapshot the chain so callbacks may register filters themselves.
        let chain = {
            let chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
            match chains.get(name) {
                Some(chain) if !chain.is_empty() => chain.clone(),
                _ => return data,
            }
        };

        chain.iter().enumerate().fold(data, |data, (index, entry)| {
            let fallback = data.clone();
            match (entry.callback)(data, extra) {
                Some(next) => next,
                None => {
                    agent_warn!(
                        "filter #{} (priority {}) for {:?} returned no value; keeping previous data",
                        index,
                        entry.priority,
                        name
                    );
                    fallback
                }
            }
        })
    }

    pub fn has_filters(&self, name: &str) -> bool {
        self.filter_count(name) > 0
    }

    /// Number of filters registered for `name`.
    pub fn filter_count(&self, name: &str) -> usize {
        let chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
        chains.get(name).map_or(0, Vec::len)
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        Err(ConfigError::EmptyFilterName)
    } else {
        Ok(())
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (name, chain) in chains.iter() {
            let priorities: Vec<i32> = chain.iter().map(|entry| entry.priority).collect();
            map.entry(name, &priorities);
        }
        map.finish()
    }
}
