use super::*;

use crate::config::{ChannelConfig, EndpointConfig};

fn ephemeral_channel(name: &str, pool: Arc<WorkerPool>) -> Arc<Channel> {
    let config = ChannelConfig {
        name: name.to_owned(),
        input: EndpointConfig::TcpServer { port: 0 },
        output: EndpointConfig::TcpServer { port: 0 },
    };
    Channel::new(&config, pool)
}

#[tokio::test]
async fn test_add_and_remove() {
    let manager = ChannelManager::new(4);

    let channel = ephemeral_channel("a", manager.worker_pool());
    manager.add(Arc::clone(&channel)).await.expect("add");
    assert!(manager.contains("a").await);
    assert!(channel.is_running());

    manager.remove("a").await;
    assert!(!manager.contains("a").await);
    assert!(!channel.is_running());

    manager.worker_pool().shutdown().await;
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let manager = ChannelManager::new(4);

    manager
        .add(ephemeral_channel("dup", manager.worker_pool()))
        .await
        .expect("first add");

    match manager
        .add(ephemeral_channel("dup", manager.worker_pool()))
        .await
    {
        Err(Error::ErrDuplicateChannel(name)) => assert_eq!(name, "dup"),
        other => panic!("expected ErrDuplicateChannel, got {other:?}"),
    }
    assert_eq!(manager.len().await, 1);

    manager.stop_all().await;
    manager.worker_pool().shutdown().await;
}

#[tokio::test]
async fn test_remove_unknown_is_noop() {
    let manager = ChannelManager::new(4);
    manager.remove("ghost").await;
    assert!(manager.is_empty().await);
    manager.worker_pool().shutdown().await;
}

#[tokio::test]
async fn test_stop_all_clears_registry() {
    let manager = ChannelManager::new(4);

    let a = ephemeral_channel("a", manager.worker_pool());
    let b = ephemeral_channel("b", manager.worker_pool());
    manager.add(Arc::clone(&a)).await.expect("add a");
    manager.add(Arc::clone(&b)).await.expect("add b");
    assert_eq!(manager.channel_names().await, vec!["a", "b"]);

    manager.stop_all().await;
    assert!(manager.is_empty().await);
    assert!(!a.is_running());
    assert!(!b.is_running());

    manager.worker_pool().shutdown().await;
}

#[tokio::test]
async fn test_failed_start_keeps_channel_registered() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").expect("blocker");
    let taken = blocker.local_addr().expect("addr").port();

    let manager = ChannelManager::new(4);
    let config = ChannelConfig {
        name: "clash".to_owned(),
        input: EndpointConfig::TcpServer { port: taken },
        output: EndpointConfig::TcpServer { port: 0 },
    };
    let channel = Channel::new(&config, manager.worker_pool());

    // add succeeds even though the channel could not start
    manager.add(Arc::clone(&channel)).await.expect("add");
    assert!(manager.contains("clash").await);
    assert!(!channel.is_running());

    manager.stop_all().await;
    manager.worker_pool().shutdown().await;
}
