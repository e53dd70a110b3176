use super::*;

use std::path::PathBuf;

struct TempDb(PathBuf);

impl TempDb {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("portbridge-test-{:08x}.db", rand::random::<u32>()));
        TempDb(path)
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn sample_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            name: "alpha".to_owned(),
            input: EndpointConfig::TcpServer { port: 9100 },
            output: EndpointConfig::TcpClient {
                ip: "192.168.1.10".to_owned(),
                port: 502,
            },
        },
        ChannelConfig {
            name: "beta".to_owned(),
            input: EndpointConfig::UdpServer { port: 9300 },
            output: EndpointConfig::UdpClient {
                ip: "10.1.2.3".to_owned(),
                port: 9301,
            },
        },
        ChannelConfig {
            name: "gamma".to_owned(),
            input: EndpointConfig::Serial {
                serial_port: "/dev/ttyUSB0".to_owned(),
                baud_rate: 115200,
            },
            output: EndpointConfig::TcpServer { port: 9400 },
        },
    ]
}

#[test]
fn test_load_from_fresh_store_is_empty() {
    let db = TempDb::new();
    let store = ConfigStore::open(&db.0).expect("open");
    assert!(store.load_channels().expect("load").is_empty());
}

#[test]
fn test_replace_then_load_round_trip() {
    let db = TempDb::new();
    let store = ConfigStore::open(&db.0).expect("open");

    let channels = sample_channels();
    store.replace_channels(&channels).expect("replace");

    // load is ordered by name; the sample is already alphabetical
    let loaded = store.load_channels().expect("load");
    assert_eq!(loaded, channels);
}

#[test]
fn test_replace_discards_previous_table() {
    let db = TempDb::new();
    let store = ConfigStore::open(&db.0).expect("open");

    store.replace_channels(&sample_channels()).expect("replace");

    let replacement = vec![ChannelConfig {
        name: "only".to_owned(),
        input: EndpointConfig::TcpServer { port: 1000 },
        output: EndpointConfig::TcpServer { port: 1001 },
    }];
    store.replace_channels(&replacement).expect("replace");

    assert_eq!(store.load_channels().expect("load"), replacement);
}

#[test]
fn test_replace_with_empty_clears_table() {
    let db = TempDb::new();
    let store = ConfigStore::open(&db.0).expect("open");

    store.replace_channels(&sample_channels()).expect("replace");
    store.replace_channels(&[]).expect("clear");

    assert!(store.load_channels().expect("load").is_empty());
}

#[test]
fn test_table_survives_reopen() {
    let db = TempDb::new();
    let channels = sample_channels();

    {
        let store = ConfigStore::open(&db.0).expect("open");
        store.replace_channels(&channels).expect("replace");
    }

    let store = ConfigStore::open(&db.0).expect("reopen");
    assert_eq!(store.load_channels().expect("load"), channels);
}

#[test]
fn test_load_orders_by_name() {
    let db = TempDb::new();
    let store = ConfigStore::open(&db.0).expect("open");

    let mut channels = sample_channels();
    channels.reverse();
    store.replace_channels(&channels).expect("replace");

    let loaded = store.load_channels().expect("load");
    let names: Vec<&str> = loaded.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}
