use super::*;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use crate::logging::ChannelLogger;

struct ChanSink(mpsc::UnboundedSender<Vec<u8>>);

impl DataSink for ChanSink {
    fn on_data(&self, data: &[u8]) {
        let _ = self.0.send(data.to_vec());
    }
}

fn test_logger() -> ChannelLogger {
    ChannelLogger::new("test").node("udp_server")
}

async fn wait_for_peers(endpoint: &UdpServerEndpoint, count: usize) {
    timeout(Duration::from_secs(2), async {
        while endpoint.peer_count().await != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer count never reached");
}

#[tokio::test]
async fn test_registers_peers_and_preserves_datagrams() {
    let endpoint = UdpServerEndpoint::new(0, test_logger());
    let (tx, mut rx) = mpsc::unbounded_channel();
    endpoint.set_data_sink(Arc::new(ChanSink(tx)));

    endpoint.open().await.expect("open");
    let addr = endpoint.local_addr().expect("bound");

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("client");
    client.send_to(b"one", addr).await.expect("send");
    client.send_to(b"two", addr).await.expect("send");

    // two datagrams arrive as two sink calls, never coalesced
    let first = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no data")
        .expect("closed");
    let second = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no data")
        .expect("closed");
    assert_eq!(first, b"one");
    assert_eq!(second, b"two");

    wait_for_peers(&endpoint, 1).await;
    endpoint.close().await;
}

#[tokio::test]
async fn test_fanout_to_known_peers() {
    let endpoint = UdpServerEndpoint::new(0, test_logger());
    endpoint.open().await.expect("open");
    let addr = endpoint.local_addr().expect("bound");

    let p1 = UdpSocket::bind("127.0.0.1:0").await.expect("p1");
    let p2 = UdpSocket::bind("127.0.0.1:0").await.expect("p2");
    p1.send_to(b"hi", addr).await.expect("send");
    p2.send_to(b"hi", addr).await.expect("send");
    wait_for_peers(&endpoint, 2).await;

    endpoint.write(b"x").await;

    for peer in [&p1, &p2] {
        let mut buf = [0u8; 16];
        let (n, from) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .expect("no datagram")
            .expect("recv");
        assert_eq!(&buf[..n], b"x");
        assert_eq!(from, addr);
    }

    endpoint.close().await;
}

#[tokio::test]
async fn test_write_with_no_peers_is_noop() {
    let endpoint = UdpServerEndpoint::new(0, test_logger());
    endpoint.open().await.expect("open");

    endpoint.write(b"nobody").await;
    assert_eq!(endpoint.state(), EndpointState::Connected);

    endpoint.close().await;
}

#[tokio::test]
async fn test_close_clears_peer_table() {
    let endpoint = UdpServerEndpoint::new(0, test_logger());
    endpoint.open().await.expect("open");
    let addr = endpoint.local_addr().expect("bound");

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("client");
    client.send_to(b"hello", addr).await.expect("send");
    wait_for_peers(&endpoint, 1).await;

    endpoint.close().await;
    assert_eq!(endpoint.peer_count().await, 0);
    assert_eq!(endpoint.state(), EndpointState::Disconnected);
}

#[tokio::test]
async fn test_open_close_idempotent() {
    let endpoint = UdpServerEndpoint::new(0, test_logger());

    assert!(endpoint.open().await.expect("open"));
    assert!(endpoint.open().await.expect("reopen"));
    endpoint.close().await;
    endpoint.close().await;
    assert_eq!(endpoint.state(), EndpointState::Disconnected);
}
