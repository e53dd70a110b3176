use super::*;

use crate::logging::ChannelLogger;

fn test_logger() -> ChannelLogger {
    ChannelLogger::new("test").node("serial")
}

#[tokio::test]
async fn test_unsupported_baud_rate_fails_open() {
    let endpoint = SerialEndpoint::new("/dev/ttyS0".to_owned(), 12345, test_logger());

    match endpoint.open().await {
        Err(Error::ErrUnsupportedBaudRate(rate)) => assert_eq!(rate, 12345),
        other => panic!("expected ErrUnsupportedBaudRate, got {other:?}"),
    }
    assert_eq!(endpoint.state(), EndpointState::Error);
}

#[tokio::test]
async fn test_missing_device_fails_open() {
    let endpoint = SerialEndpoint::new(
        "/dev/nonexistent-bridge-test".to_owned(),
        115200,
        test_logger(),
    );

    assert!(endpoint.open().await.is_err());
    assert_eq!(endpoint.state(), EndpointState::Error);
}

#[tokio::test]
async fn test_write_before_open_is_dropped() {
    let endpoint = SerialEndpoint::new("/dev/ttyS0".to_owned(), 9600, test_logger());

    endpoint.write(b"dropped").await;
    assert_eq!(endpoint.state(), EndpointState::Disconnected);
}

#[tokio::test]
async fn test_close_without_open() {
    let endpoint = SerialEndpoint::new("/dev/ttyS0".to_owned(), 9600, test_logger());

    endpoint.close().await;
    endpoint.close().await;
    assert_eq!(endpoint.state(), EndpointState::Disconnected);
}

#[test]
fn test_standard_baud_table() {
    for rate in [9600, 115200, 4_000_000] {
        assert!(STANDARD_BAUD_RATES.contains(&rate));
    }
    assert!(!STANDARD_BAUD_RATES.contains(&12345));
    // table is sorted ascending from the slowest teletype rate up
    assert!(STANDARD_BAUD_RATES.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(STANDARD_BAUD_RATES.first(), Some(&50));
}

#[test]
fn test_info_string() {
    let endpoint = SerialEndpoint::new("/dev/ttyUSB0".to_owned(), 115200, test_logger());
    assert_eq!(endpoint.info(), "Serial:/dev/ttyUSB0:115200");
}
