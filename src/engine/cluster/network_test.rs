use crate::engine::cluster::network::{ChannelHub, ChannelTransport, NetworkManager, Transport};
use crate::engine::query::query_id::QueryId;
use crate::shared::protocol::messages::{ChunkPayload, ClusterMessage};

#[tokio::test]
async fn test_channel_transport_delivers() {
    let hub = ChannelHub::new();
    let mut rx = hub.register(1);
    let transport = ChannelTransport::new(hub.clone());

    let query_id = QueryId::generate(0);
    transport
        .send(1, ClusterMessage::Commit { query_id })
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        ClusterMessage::Commit { query_id: got } => assert_eq!(got, query_id),
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn test_send_to_dead_instance_is_dropped() {
    let hub = ChannelHub::new();
    let _rx = hub.register(1);
    hub.disconnect(1);
    let transport = ChannelTransport::new(hub);
    // vanishes like on a real network, no error
    transport
        .send(1, ClusterMessage::Abort { query_id: QueryId::generate(0) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_broadcast_skips_self() {
    let hub = ChannelHub::new();
    let mut rx0 = hub.register(0);
    let mut rx1 = hub.register(1);
    let network = NetworkManager::new(0, ChannelTransport::new(hub));

    let query_id = QueryId::generate(0);
    network
        .broadcast(&[0, 1], ClusterMessage::Commit { query_id })
        .await
        .unwrap();

    assert!(rx1.recv().await.is_some());
    // nothing was sent to the local instance
    assert!(rx0.try_recv().is_err());
}

#[tokio::test]
async fn test_exchange_buffers_early_chunks() {
    let hub = ChannelHub::new();
    let network = NetworkManager::new(0, ChannelTransport::new(hub));
    let query_id = QueryId::generate(0);

    // a chunk lands before the operator registered the exchange
    assert!(network.route_sg_chunk(query_id, 3, 1, ChunkPayload::eof_marker(0)));

    let mut rx = network.register_exchange(query_id, 3);
    let (from, chunk) = rx.recv().await.unwrap();
    assert_eq!(from, 1);
    assert!(chunk.eof);

    network.close_exchange(query_id, 3);
}
