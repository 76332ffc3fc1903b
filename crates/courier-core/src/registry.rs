//! Adapter registry
//!
//! Maps a channel type to its adapter instance. Populated once at startup
//! and read-mostly afterwards.

use crate::adapter::ChannelAdapter;
use crate::message::ChannelType;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Registry of channel adapters
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<ChannelType, Arc<dyn ChannelAdapter>>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an adapter to a channel, replacing any previous binding
    pub fn add_adapter(&self, channel: ChannelType, adapter: Arc<dyn ChannelAdapter>) {
        let mut adapters = self.adapters.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = adapters.get(&channel) {
            if !same_instance(existing, &adapter) {
                warn!(channel = %channel, "Replacing adapter already registered for channel");
            }
        }
        adapters.insert(channel, adapter);
        info!(channel = %channel, "Channel adapter registered");
    }

    /// Register an adapter under its own channel type
    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.add_adapter(adapter.channel_type(), adapter);
    }

    /// Look up the adapter for a channel
    #[must_use]
    pub fn get_adapter(&self, channel: ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&channel)
            .cloned()
    }

    /// All registered adapters, ordered by channel
    #[must_use]
    pub fn get_all(&self) -> Vec<(ChannelType, Arc<dyn ChannelAdapter>)> {
        let adapters = self.adapters.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = adapters
            .iter()
            .map(|(channel, adapter)| (*channel, Arc::clone(adapter)))
            .collect();
        all.sort_by_key(|(channel, _)| *channel);
        all
    }

    /// Registered channel types
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelType> {
        self.get_all().into_iter().map(|(c, _)| c).collect()
    }

    /// Whether a channel has an adapter
    #[must_use]
    pub fn contains(&self, channel: ChannelType) -> bool {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&channel)
    }
}

fn same_instance(a: &Arc<dyn ChannelAdapter>, b: &Arc<dyn ChannelAdapter>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
