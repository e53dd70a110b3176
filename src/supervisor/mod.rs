
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::manager::ChannelManager;
use crate::store::ConfigStore;

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic reconciliation of the live channel set against the store.
///
/// Each tick loads the desired channel table and applies the difference:
/// removed or changed channels are torn down, new or changed ones built.
/// A store failure skips the tick and keeps the previous state untouched.
pub struct Supervisor {
    store: ConfigStore,
    manager: Arc<ChannelManager>,
    interval: Duration,
}

impl Supervisor {
    pub fn new(store: ConfigStore, manager: Arc<ChannelManager>) -> Self {
        Self::with_interval(store, manager, DEFAULT_RECONCILE_INTERVAL)
    }

    pub fn with_interval(
        store: ConfigStore,
        manager: Arc<ChannelManager>,
        interval: Duration,
    ) -> Self {
        Supervisor {
            store,
            manager,
            interval,
        }
    }

    /// Loads the initial channel set, then reconciles every interval until a
    /// shutdown notification arrives. Stops every channel before returning.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut last: HashMap<String, ChannelConfig> = HashMap::new();
        self.reconcile(&mut last).await;

        loop {
            tokio::select! {
                _ = sleep(self.interval) => self.reconcile(&mut last).await,
                _ = shutdown_rx.recv() => break,
            }
        }

        log::info!("shutting down, stopping all channels");
        self.manager.stop_all().await;
    }

    async fn reconcile(&self, last: &mut HashMap<String, ChannelConfig>) {
        let desired = match self.store.load_channels() {
            Ok(channels) => channels,
            Err(err) => {
                log::error!("channel table reload failed, keeping current set: {err}");
                return;
            }
        };

        let (to_remove, to_add) = diff(last, &desired);

        for name in to_remove {
            self.manager.remove(&name).await;
            last.remove(&name);
        }

        for config in to_add {
            let channel = Channel::new(&config, self.manager.worker_pool());
            match self.manager.add(channel).await {
                Ok(()) => {
                    last.insert(config.name.clone(), config);
                }
                Err(err) => {
                    log::error!("add of channel '{}' failed: {err}", config.name);
                }
            }
        }
    }
}

/// Splits the desired table against the running one into names to tear down
/// (removed or changed) and configs to build (new or changed). A changed
/// channel appears in both: teardown first, then rebuild.
pub fn diff(
    last: &HashMap<String, ChannelConfig>,
    desired: &[ChannelConfig],
) -> (Vec<String>, Vec<ChannelConfig>) {
    let desired_by_name: HashMap<&str, &ChannelConfig> =
        desired.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut to_remove = Vec::new();
    for (name, config) in last {
        match desired_by_name.get(name.as_str()) {
            Some(d) if **d == *config => {}
            _ => to_remove.push(name.clone()),
        }
    }
    to_remove.sort();

    let mut to_add = Vec::new();
    for config in desired {
        match last.get(&config.name) {
            Some(prev) if *prev == *config => {}
            _ => to_add.push(config.clone()),
        }
    }

    (to_remove, to_add)
}
