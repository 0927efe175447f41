//! Queue registry: resolves configuration and opens broker handles.

use crate::backend::{Broker, QueueBackend};
use crate::config::ConfigResolver;
use crate::error::JobResult;
use std::sync::Arc;
use tracing::debug;

/// Opens queue handles with resolved configuration.
///
/// Handles are not cached here. Every call opens a fresh handle bound to the
/// same broker resource; the broker owns job state shared between them.
#[derive(Clone)]
pub struct QueueRegistry {
    resolver: Arc<ConfigResolver>,
    broker: Arc<dyn Broker>,
}

impl QueueRegistry {
    pub fn new(resolver: Arc<ConfigResolver>, broker: Arc<dyn Broker>) -> Self {
        Self { resolver, broker }
    }

    /// Open a handle for `name`. No network I/O happens here.
    pub fn get_queue(&self, name: &str) -> JobResult<Arc<dyn QueueBackend>> {
        let config = self.resolver.resolve_queue_config(name);
        debug!(queue = %name, prefix = %config.prefix, "Opening queue handle");
        self.broker.open(name, &config)
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }
}
