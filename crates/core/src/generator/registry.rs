//! Capability-keyed adapter registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

use super::error::GenerationError;
use super::traits::GeneratorAdapter;
use crate::job::ContentType;

/// Adapters grouped by the content type they produce.
///
/// A capability can hold several adapters; [`pick`](Self::pick) rotates
/// through them round-robin.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ContentType, Vec<Arc<dyn GeneratorAdapter>>>,
    cursors: HashMap<ContentType, AtomicUsize>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own capability.
    pub fn register(&mut self, adapter: Arc<dyn GeneratorAdapter>) {
        let capability = adapter.capability();
        info!(adapter = adapter.name(), capability = %capability, "Registered generator adapter");
        self.adapters.entry(capability).or_default().push(adapter);
        self.cursors.entry(capability).or_default();
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, adapter: Arc<dyn GeneratorAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn has(&self, capability: ContentType) -> bool {
        self.adapters
            .get(&capability)
            .is_some_and(|list| !list.is_empty())
    }

    /// Capabilities with at least one adapter.
    pub fn capabilities(&self) -> Vec<ContentType> {
        ContentType::ALL
            .into_iter()
            .filter(|c| self.has(*c))
            .collect()
    }

    /// Next adapter for a capability.
    pub fn pick(&self, capability: ContentType) -> Option<Arc<dyn GeneratorAdapter>> {
        let list = self.adapters.get(&capability)?;
        if list.is_empty() {
            return None;
        }
        let index = self
            .cursors
            .get(&capability)
            .map(|c| c.fetch_add(1, Ordering::Relaxed))
            .unwrap_or(0);
        Some(Arc::clone(&list[index % list.len()]))
    }

    /// Run `validate` on every adapter, returning the failures.
    pub async fn validate_all(&self) -> Vec<(String, GenerationError)> {
        let mut failures = Vec::new();
        for adapter in self.adapters.values().flatten() {
            if let Err(e) = adapter.validate().await {
                failures.push((adapter.name().to_string(), e));
            }
        }
        failures
    }
}
