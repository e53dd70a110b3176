
/// Channel-scoped logging handle.
///
/// Every record carries the owning channel name and a node tag so records
/// from the two ends of a channel stay distinguishable in a shared log
/// stream. Handed down explicitly: the manager gives one to each channel,
/// the channel derives one per endpoint.
#[derive(Debug, Clone)]
pub struct ChannelLogger {
    channel: String,
    node: Option<String>,
}

impl ChannelLogger {
    pub fn new(channel: impl Into<String>) -> Self {
        ChannelLogger {
            channel: channel.into(),
            node: None,
        }
    }

    /// Derives a handle tagged with a node label ("input" / "output").
    pub fn node(&self, node: impl Into<String>) -> Self {
        ChannelLogger {
            channel: self.channel.clone(),
            node: Some(node.into()),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    fn prefix(&self) -> String {
        match &self.node {
            Some(node) => format!("[{}] [{}]", self.channel, node),
            None => format!("[{}]", self.channel),
        }
    }

    pub fn debug(&self, msg: &str) {
        log::debug!("{} {}", self.prefix(), msg);
    }

    pub fn info(&self, msg: &str) {
        log::info!("{} {}", self.prefix(), msg);
    }

    pub fn warn(&self, msg: &str) {
        log::warn!("{} {}", self.prefix(), msg);
    }

    pub fn error(&self, msg: &str) {
        log::error!("{} {}", self.prefix(), msg);
    }

    /// Hex-dumps a payload at DEBUG. The encode cost is paid only when the
    /// level is enabled.
    pub fn binary(&self, tag: &str, data: &[u8]) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "{} {} {} ({} bytes)",
                self.prefix(),
                tag,
                hex::encode(data),
                data.len()
            );
        }
    }
}
