//! End-to-end pairing tests: two channels against an in-process relay.

use pairlink::channel::{ChannelMetadata, ChannelNotification, NotificationKind, PeerInfo};
use pairlink::relay::{RelayClient, RelayEvent, RelayServer};
use pairlink::utils::{ChannelError, PairlinkError};
use pairlink::{
    ConnectionState, FileSessionStore, MemorySessionStore, OriginatorInfo, PairlinkConfig,
    SecureChannel, WalletInfo,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

async fn spawn_relay() -> PairlinkConfig {
    let mut config = PairlinkConfig::default();
    config.relay.listen_addr = "127.0.0.1:0".to_string();
    let server = RelayServer::bind(&config.relay)
        .await
        .expect("bind relay server");
    config.relay.server_url = server.local_addr().expect("local addr").to_string();
    tokio::spawn(server.run());
    config
}

fn dapp_metadata() -> ChannelMetadata {
    ChannelMetadata {
        originator_info: OriginatorInfo {
            url: "https://dapp.example".to_string(),
            title: "Example Dapp".to_string(),
            platform: "web".to_string(),
            sdk_version: "0.1.0".to_string(),
        },
        ..ChannelMetadata::default()
    }
}

fn wallet_metadata() -> ChannelMetadata {
    ChannelMetadata {
        wallet_info: WalletInfo {
            name: "Test Wallet".to_string(),
            version: "1.2.3".to_string(),
            platform: "ios".to_string(),
        },
        ..ChannelMetadata::default()
    }
}

async fn new_channel(
    config: &PairlinkConfig,
    metadata: ChannelMetadata,
) -> (SecureChannel, UnboundedReceiver<ChannelNotification>) {
    SecureChannel::new(config, metadata, Box::new(MemorySessionStore::new()))
        .await
        .expect("channel connects to relay")
}

async fn wait_until(
    rx: &mut UnboundedReceiver<ChannelNotification>,
    mut matches: impl FnMut(&ChannelNotification) -> bool,
) -> ChannelNotification {
    timeout(Duration::from_secs(5), async {
        loop {
            let notification = rx.recv().await.expect("notification stream closed");
            if matches(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}

async fn wait_for_state(
    rx: &mut UnboundedReceiver<ChannelNotification>,
    state: ConnectionState,
) -> ChannelNotification {
    wait_until(rx, |n| n.state == state).await
}

async fn next_payload(rx: &mut UnboundedReceiver<ChannelNotification>) -> Vec<u8> {
    let notification =
        wait_until(rx, |n| matches!(n.kind, NotificationKind::Message { .. })).await;
    match notification.kind {
        NotificationKind::Message { payload } => payload,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_two_peers_pair_and_exchange_messages() {
    let config = spawn_relay().await;

    let (dapp, mut dapp_rx) = new_channel(&config, dapp_metadata()).await;
    let pairing = dapp.generate_channel_id_connect().expect("pairing info");

    let (wallet, mut wallet_rx) = new_channel(&config, wallet_metadata()).await;
    wallet
        .connect_to_channel(pairing.channel_id, &pairing.public_key)
        .expect("join channel");

    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;
    assert!(dapp.is_linked());
    assert!(wallet.is_linked());

    // The post-link identification exchange runs automatically
    let ready = wait_until(&mut wallet_rx, |n| {
        matches!(n.kind, NotificationKind::ClientsReady { .. })
    })
    .await;
    match ready.kind {
        NotificationKind::ClientsReady {
            peer: PeerInfo::Originator(info),
        } => assert_eq!(info.title, "Example Dapp"),
        other => panic!("expected originator info, got {other:?}"),
    }

    let ready = wait_until(&mut dapp_rx, |n| {
        matches!(n.kind, NotificationKind::ClientsReady { .. })
    })
    .await;
    match ready.kind {
        NotificationKind::ClientsReady {
            peer: PeerInfo::Wallet(info),
        } => assert_eq!(info.name, "Test Wallet"),
        other => panic!("expected wallet info, got {other:?}"),
    }

    // Traffic decrypts in both directions, so both sides hold the same keys
    dapp.send(b"sign this payload").expect("send");
    assert_eq!(next_payload(&mut wallet_rx).await, b"sign this payload");

    wallet.send(b"signature bytes").expect("send");
    assert_eq!(next_payload(&mut dapp_rx).await, b"signature bytes");
}

#[tokio::test]
async fn test_third_client_evicts_the_room() {
    let config = spawn_relay().await;

    let (dapp, mut dapp_rx) = new_channel(&config, dapp_metadata()).await;
    let pairing = dapp.generate_channel_id_connect().expect("pairing info");

    let (wallet, mut wallet_rx) = new_channel(&config, wallet_metadata()).await;
    wallet
        .connect_to_channel(pairing.channel_id, &pairing.public_key)
        .expect("join channel");
    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;

    // An interloper joining the full room gets rejected and empties it
    let (intruder, mut intruder_rx) = RelayClient::connect(&config.relay.server_url)
        .await
        .expect("connect");
    intruder.join_channel(pairing.channel_id).expect("join");

    let rejected = timeout(Duration::from_secs(5), async {
        loop {
            match intruder_rx.recv().await.expect("relay stream closed") {
                RelayEvent::RoomFull { channel_id } => return channel_id,
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for rejection");
    assert_eq!(rejected, pairing.channel_id.to_string());

    // Both legitimate members fall back to the recoverable paused state
    wait_for_state(&mut dapp_rx, ConnectionState::Paused).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Paused).await;
}

#[tokio::test]
async fn test_prelink_sends_flush_in_order() {
    let config = spawn_relay().await;

    let (dapp, mut dapp_rx) = new_channel(&config, dapp_metadata()).await;
    let pairing = dapp.generate_channel_id_connect().expect("pairing info");

    dapp.send(b"first").expect("queued");
    dapp.send(b"second").expect("queued");
    dapp.send(b"third").expect("queued");

    let (wallet, mut wallet_rx) = new_channel(&config, wallet_metadata()).await;
    wallet
        .connect_to_channel(pairing.channel_id, &pairing.public_key)
        .expect("join channel");
    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;

    assert_eq!(next_payload(&mut wallet_rx).await, b"first");
    assert_eq!(next_payload(&mut wallet_rx).await, b"second");
    assert_eq!(next_payload(&mut wallet_rx).await, b"third");

    dapp.send(b"fourth").expect("send");
    assert_eq!(next_payload(&mut wallet_rx).await, b"fourth");
}

#[tokio::test]
async fn test_pause_then_resume_relinks_same_room() {
    let config = spawn_relay().await;

    let (dapp, mut dapp_rx) = new_channel(&config, dapp_metadata()).await;
    let pairing = dapp.generate_channel_id_connect().expect("pairing info");

    let (wallet, mut wallet_rx) = new_channel(&config, wallet_metadata()).await;
    wallet
        .connect_to_channel(pairing.channel_id, &pairing.public_key)
        .expect("join channel");
    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;

    dapp.pause().expect("pause");
    assert_eq!(dapp.state(), ConnectionState::Paused);
    wait_for_state(&mut wallet_rx, ConnectionState::Paused).await;

    // Resuming rejoins the same room without tripping the capacity check,
    // and the handshake runs again before traffic flows
    dapp.resume().expect("resume");

    let exchanged = wait_until(&mut dapp_rx, |n| {
        matches!(n.kind, NotificationKind::KeysExchanged)
    })
    .await;
    assert_eq!(exchanged.state, ConnectionState::Linked);
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;

    dapp.send(b"after the pause").expect("send");
    assert_eq!(next_payload(&mut wallet_rx).await, b"after the pause");

    wallet.send(b"still paired").expect("send");
    assert_eq!(next_payload(&mut dapp_rx).await, b"still paired");
}

#[tokio::test]
async fn test_resume_reuses_rendezvous_with_fresh_keys() {
    let config = spawn_relay().await;
    let dir = tempfile::TempDir::new().expect("tempdir");
    let store_path = dir.path().join("session.json");

    let (dapp, mut dapp_rx) = SecureChannel::new(
        &config,
        dapp_metadata(),
        Box::new(FileSessionStore::new(&store_path)),
    )
    .await
    .expect("channel");
    let pairing = dapp.generate_channel_id_connect().expect("pairing info");

    let (wallet, mut wallet_rx) = new_channel(&config, wallet_metadata()).await;
    wallet
        .connect_to_channel(pairing.channel_id, &pairing.public_key)
        .expect("join channel");
    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;

    // First device goes away without destroying the pairing
    dapp.disconnect();
    wait_for_state(&mut wallet_rx, ConnectionState::Paused).await;

    // A new process finds the stored rendezvous and rejoins it
    let (resumed_dapp, mut resumed_rx) = SecureChannel::new(
        &config,
        dapp_metadata(),
        Box::new(FileSessionStore::new(&store_path)),
    )
    .await
    .expect("channel");
    let resumed = resumed_dapp
        .resume_session()
        .expect("resume")
        .expect("stored session present");

    assert_eq!(resumed.channel_id, pairing.channel_id);
    // Keys are never reused across links
    assert_ne!(resumed.public_key, pairing.public_key);

    // The waiting wallet re-pairs from scratch and traffic flows again
    wait_for_state(&mut resumed_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;

    resumed_dapp.send(b"back again").expect("send");
    assert_eq!(next_payload(&mut wallet_rx).await, b"back again");

    wallet.send(b"welcome back").expect("send");
    assert_eq!(next_payload(&mut resumed_rx).await, b"welcome back");
}

#[tokio::test]
async fn test_terminate_clears_session_and_reaches_peer() {
    let config = spawn_relay().await;
    let dir = tempfile::TempDir::new().expect("tempdir");
    let store_path = dir.path().join("session.json");

    let (dapp, mut dapp_rx) = SecureChannel::new(
        &config,
        dapp_metadata(),
        Box::new(FileSessionStore::new(&store_path)),
    )
    .await
    .expect("channel");
    let pairing = dapp.generate_channel_id_connect().expect("pairing info");

    let (wallet, mut wallet_rx) = new_channel(&config, wallet_metadata()).await;
    wallet
        .connect_to_channel(pairing.channel_id, &pairing.public_key)
        .expect("join channel");
    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;
    // The identification round trip orders after the session write
    wait_until(&mut dapp_rx, |n| {
        matches!(n.kind, NotificationKind::ClientsReady { .. })
    })
    .await;
    assert!(store_path.exists());

    dapp.terminate();

    // The peer learns the pairing is gone, not merely paused
    wait_for_state(&mut wallet_rx, ConnectionState::Terminated).await;
    assert!(!store_path.exists());

    match dapp.send(b"too late") {
        Err(PairlinkError::Channel(ChannelError::Terminated)) => {}
        other => panic!("expected terminated, got {other:?}"),
    }
    match wallet.send(b"also too late") {
        Err(PairlinkError::Channel(ChannelError::Terminated)) => {}
        other => panic!("expected terminated, got {other:?}"),
    }
}
