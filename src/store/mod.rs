#[cfg(test)]
mod store_test;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Statement};

use crate::config::{ChannelConfig, EndpointConfig};
use crate::error::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS endpoints (
    id INTEGER PRIMARY KEY,
    channel_id INTEGER NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('input', 'output')),
    type TEXT NOT NULL,
    port INTEGER,
    ip TEXT,
    serial_port TEXT,
    baud_rate INTEGER,
    FOREIGN KEY(channel_id) REFERENCES channels(id) ON DELETE CASCADE
);
"#;

const LOAD_SQL: &str = r#"
SELECT c.name,
       i.type, i.port, i.ip, i.serial_port, i.baud_rate,
       o.type, o.port, o.ip, o.serial_port, o.baud_rate
FROM channels c
JOIN endpoints i ON c.id = i.channel_id AND i.role = 'input'
JOIN endpoints o ON c.id = o.channel_id AND o.role = 'output'
ORDER BY c.name
"#;

/// Nullable endpoint columns as stored, before tag-directed decoding.
struct EndpointRow {
    kind: String,
    port: Option<i64>,
    ip: Option<String>,
    serial_port: Option<String>,
    baud_rate: Option<i64>,
}

/// SQLite-backed channel table.
///
/// The connection sits behind a mutex; callers are the reconciliation loop
/// (once per second) and the `--update` path, so contention is nil.
pub struct ConfigStore {
    conn: Mutex<Connection>,
}

impl ConfigStore {
    /// Opens (and if necessary creates) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        // the daemon and a concurrent `--update` invocation share this file
        conn.busy_timeout(std::time::Duration::from_secs(1))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(ConfigStore {
            conn: Mutex::new(conn),
        })
    }

    /// Loads the full channel table, ordered by name.
    pub fn load_channels(&self) -> Result<Vec<ChannelConfig>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(LOAD_SQL)?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                EndpointRow {
                    kind: row.get(1)?,
                    port: row.get(2)?,
                    ip: row.get(3)?,
                    serial_port: row.get(4)?,
                    baud_rate: row.get(5)?,
                },
                EndpointRow {
                    kind: row.get(6)?,
                    port: row.get(7)?,
                    ip: row.get(8)?,
                    serial_port: row.get(9)?,
                    baud_rate: row.get(10)?,
                },
            ))
        })?;

        let mut channels = Vec::new();
        for row in rows {
            let (name, input, output) = row?;
            channels.push(ChannelConfig {
                input: decode_endpoint(&name, input)?,
                output: decode_endpoint(&name, output)?,
                name,
            });
        }
        Ok(channels)
    }

    /// Replaces the whole table: DELETE-all plus INSERTs inside one
    /// transaction, so readers never observe a partial table.
    pub fn replace_channels(&self, channels: &[ChannelConfig]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // endpoint rows go with their channels via ON DELETE CASCADE
        tx.execute("DELETE FROM channels", [])?;
        {
            let mut channel_stmt = tx.prepare("INSERT INTO channels (name) VALUES (?1)")?;
            let mut endpoint_stmt = tx.prepare(
                "INSERT INTO endpoints (channel_id, role, type, port, ip, serial_port, baud_rate) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for channel in channels {
                channel_stmt.execute(params![channel.name])?;
                let channel_id = tx.last_insert_rowid();
                insert_endpoint(&mut endpoint_stmt, channel_id, "input", &channel.input)?;
                insert_endpoint(&mut endpoint_stmt, channel_id, "output", &channel.output)?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

fn insert_endpoint(
    stmt: &mut Statement<'_>,
    channel_id: i64,
    role: &str,
    endpoint: &EndpointConfig,
) -> Result<()> {
    let (port, ip, serial_port, baud_rate) = match endpoint {
        EndpointConfig::TcpServer { port } | EndpointConfig::UdpServer { port } => {
            (Some(i64::from(*port)), None, None, None)
        }
        EndpointConfig::TcpClient { ip, port } | EndpointConfig::UdpClient { ip, port } => {
            (Some(i64::from(*port)), Some(ip.as_str()), None, None)
        }
        EndpointConfig::Serial {
            serial_port,
            baud_rate,
        } => (
            None,
            None,
            Some(serial_port.as_str()),
            Some(i64::from(*baud_rate)),
        ),
    };

    stmt.execute(params![
        channel_id,
        role,
        endpoint.kind(),
        port,
        ip,
        serial_port,
        baud_rate,
    ])?;
    Ok(())
}

fn decode_endpoint(channel: &str, row: EndpointRow) -> Result<EndpointConfig> {
    let port = || -> Result<u16> {
        let value = row.port.ok_or_else(|| {
            Error::ErrInvalidConfig(format!("channel '{channel}': stored endpoint without port"))
        })?;
        u16::try_from(value).map_err(|_| {
            Error::ErrInvalidConfig(format!("channel '{channel}': stored port {value} out of range"))
        })
    };
    let ip = || -> Result<String> {
        row.ip.clone().ok_or_else(|| {
            Error::ErrInvalidConfig(format!("channel '{channel}': stored endpoint without ip"))
        })
    };

    match row.kind.as_str() {
        "tcp_server" => Ok(EndpointConfig::TcpServer { port: port()? }),
        "tcp_client" => Ok(EndpointConfig::TcpClient {
            ip: ip()?,
            port: port()?,
        }),
        "udp_server" => Ok(EndpointConfig::UdpServer { port: port()? }),
        "udp_client" => Ok(EndpointConfig::UdpClient {
            ip: ip()?,
            port: port()?,
        }),
        "serial" => {
            let serial_port = row.serial_port.clone().ok_or_else(|| {
                Error::ErrInvalidConfig(format!(
                    "channel '{channel}': stored serial endpoint without device path"
                ))
            })?;
            let baud_rate = row.baud_rate.ok_or_else(|| {
                Error::ErrInvalidConfig(format!(
                    "channel '{channel}': stored serial endpoint without baud rate"
                ))
            })?;
            let baud_rate = u32::try_from(baud_rate).map_err(|_| {
                Error::ErrInvalidConfig(format!(
                    "channel '{channel}': stored baud rate {baud_rate} out of range"
                ))
            })?;
            Ok(EndpointConfig::Serial {
                serial_port,
                baud_rate,
            })
        }
        other => Err(Error::ErrInvalidConfig(format!(
            "channel '{channel}': unknown stored endpoint type '{other}'"
        ))),
    }
}
