#[cfg(test)]
mod manager_test;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future;
use tokio::sync::Mutex;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::pool::WorkerPool;

/// Registry of running channels keyed by name.
///
/// The manager exclusively owns every channel in the map and shares one
/// worker pool among them. Channel-internal concurrency is each channel's
/// own business; the registry lock only guards map mutation and is released
/// before any channel is started or stopped.
pub struct ChannelManager {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    pool: Arc<WorkerPool>,
}

impl ChannelManager {
    pub fn new(pool_size: usize) -> Self {
        ChannelManager {
            channels: Mutex::new(HashMap::new()),
            pool: Arc::new(WorkerPool::new(pool_size)),
        }
    }

    pub fn with_default_pool() -> Self {
        ChannelManager {
            channels: Mutex::new(HashMap::new()),
            pool: Arc::new(WorkerPool::with_default_size()),
        }
    }

    /// The pool shared by every channel.
    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    /// Registers and starts a channel. A channel with the same name must be
    /// removed first. A channel whose endpoints fail to open stays
    /// registered but stopped; reconciliation will rebuild it when its
    /// configuration changes.
    pub async fn add(&self, channel: Arc<Channel>) -> Result<()> {
        let name = channel.name().to_owned();
        {
            let mut channels = self.channels.lock().await;
            if channels.contains_key(&name) {
                return Err(Error::ErrDuplicateChannel(name));
            }
            channels.insert(name.clone(), Arc::clone(&channel));
        }

        if let Err(err) = channel.start().await {
            log::error!("[{name}] start failed: {err}");
        }
        Ok(())
    }

    /// Stops and removes a channel; logs a warning when the name is unknown.
    pub async fn remove(&self, name: &str) {
        let channel = self.channels.lock().await.remove(name);
        match channel {
            Some(channel) => channel.stop().await,
            None => log::warn!("remove of unknown channel '{name}'"),
        }
    }

    /// Stops every channel and clears the registry.
    pub async fn stop_all(&self) {
        let channels: Vec<Arc<Channel>> = {
            let mut map = self.channels.lock().await;
            map.drain().map(|(_, channel)| channel).collect()
        };

        future::join_all(channels.iter().map(|channel| channel.stop())).await;
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.channels.lock().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.lock().await.is_empty()
    }

    /// Registered channel names, sorted.
    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}
