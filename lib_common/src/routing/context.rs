//! Shared handles every connection task needs.

use std::sync::Arc;

use crate::connections::{NullSink, SharedSink};

use super::config::HubConfig;
use super::registry::Hub;
use super::resolver::Resolver;

/// Cheap to clone; one per spawned connection task.
#[derive(Clone)]
pub struct RelayContext {
    pub hub: Arc<Hub>,
    pub config: Arc<HubConfig>,
    pub resolver: Arc<Resolver>,
    pub sink: SharedSink,
}

impl RelayContext {
    pub fn new(config: HubConfig, sink: SharedSink) -> Self {
        Self {
            hub: Arc::new(Hub::new()),
            config: Arc::new(config),
            resolver: Arc::new(Resolver::default()),
            sink,
        }
    }

    /// Default configuration, no state mirror.
    pub fn standalone() -> Self {
        Self::new(HubConfig::default(), Arc::new(NullSink))
    }
}
