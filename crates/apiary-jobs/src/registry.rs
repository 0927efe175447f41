//! Processor registry: queue name to handler bindings.

use crate::backend::{handler_fn, Handler};
use crate::error::JobError;
use crate::job::Job;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use tracing::{info, warn};

/// Maps queue names to their handlers.
///
/// A name holds at most one binding. Registering a name again replaces the
/// earlier handler.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    handlers: BTreeMap<String, Handler>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `name`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) -> &mut Self {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!(queue = %name, "Replacing previously registered handler");
        } else {
            info!(queue = %name, "Registered queue handler");
        }
        self
    }

    /// Bind an async closure to `name`.
    pub fn worker<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.register(name, handler_fn(f))
    }

    /// Handler bound to `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered queue names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("queues", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S: Into<String>> Extend<(S, Handler)> for ProcessorRegistry {
    fn extend<I: IntoIterator<Item = (S, Handler)>>(&mut self, iter: I) {
        for (name, handler) in iter {
            self.register(name, handler);
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Handler)> for ProcessorRegistry {
    fn from_iter<I: IntoIterator<Item = (S, Handler)>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.extend(iter);
        registry
    }
}
