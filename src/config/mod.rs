
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One end of a channel. The tag decides which fields exist, so a config can
/// never carry fields that are meaningless for its endpoint type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointConfig {
    TcpServer {
        port: u16,
    },
    TcpClient {
        #[serde(alias = "server_ip")]
        ip: String,
        #[serde(alias = "server_port")]
        port: u16,
    },
    UdpServer {
        port: u16,
    },
    UdpClient {
        ip: String,
        port: u16,
    },
    Serial {
        #[serde(alias = "port")]
        serial_port: String,
        baud_rate: u32,
    },
}

impl EndpointConfig {
    /// The wire tag, also used as the `type` column in the store.
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointConfig::TcpServer { .. } => "tcp_server",
            EndpointConfig::TcpClient { .. } => "tcp_client",
            EndpointConfig::UdpServer { .. } => "udp_server",
            EndpointConfig::UdpClient { .. } => "udp_client",
            EndpointConfig::Serial { .. } => "serial",
        }
    }

    fn validate(&self, channel: &str) -> Result<()> {
        match self {
            EndpointConfig::TcpClient { ip, .. } | EndpointConfig::UdpClient { ip, .. } => {
                if ip.is_empty() {
                    return Err(Error::ErrInvalidConfig(format!(
                        "channel '{channel}': {} endpoint without ip",
                        self.kind()
                    )));
                }
            }
            EndpointConfig::Serial {
                serial_port,
                baud_rate,
            } => {
                if serial_port.is_empty() {
                    return Err(Error::ErrInvalidConfig(format!(
                        "channel '{channel}': serial endpoint without device path"
                    )));
                }
                if *baud_rate == 0 {
                    return Err(Error::ErrInvalidConfig(format!(
                        "channel '{channel}': serial endpoint without baud rate"
                    )));
                }
            }
            EndpointConfig::TcpServer { .. } | EndpointConfig::UdpServer { .. } => {}
        }
        Ok(())
    }
}

/// A named bridge between two endpoints. The name is the stable identity;
/// equality is structural over all fields so "same name, different
/// endpoints" compares unequal and triggers replacement at reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub input: EndpointConfig,
    pub output: EndpointConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

/// Picks the parser from the file extension (`.json`, `.yaml`, `.yml`).
pub fn detect_format(path: &Path) -> Result<ConfigFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" => Ok(ConfigFormat::Json),
        "yaml" | "yml" => Ok(ConfigFormat::Yaml),
        _ => Err(Error::ErrUnknownConfigFormat(
            path.to_string_lossy().into_owned(),
        )),
    }
}

pub fn parse_str(content: &str, format: ConfigFormat) -> Result<Vec<ChannelConfig>> {
    let file: ConfigFile = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };
    validate_channels(&file.channels)?;
    Ok(file.channels)
}

/// Reads and parses a channel table, format detected from the extension.
pub fn parse_file(path: &Path) -> Result<Vec<ChannelConfig>> {
    let format = detect_format(path)?;
    let content = fs::read_to_string(path)?;
    parse_str(&content, format)
}

pub fn validate_channels(channels: &[ChannelConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for channel in channels {
        if channel.name.is_empty() {
            return Err(Error::ErrInvalidConfig("channel without a name".to_owned()));
        }
        if !seen.insert(channel.name.as_str()) {
            return Err(Error::ErrInvalidConfig(format!(
                "duplicate channel name '{}'",
                channel.name
            )));
        }
        channel.input.validate(&channel.name)?;
        channel.output.validate(&channel.name)?;
    }
    Ok(())
}
