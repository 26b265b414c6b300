use std::sync::Arc;

use medq_core::{LiveUpdateHub, QueueEngine};

/// Shared handles every handler needs.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueueEngine>,
    pub hub: Arc<LiveUpdateHub>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub_channels", &self.hub.active_channel_count())
            .finish()
    }
}

impl AppState {
    pub fn new(engine: Arc<QueueEngine>, hub: Arc<LiveUpdateHub>) -> Self {
        Self { engine, hub }
    }
}
