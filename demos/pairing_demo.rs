//! Pairing demo: spin up an in-process relay, pair a dapp channel with a
//! wallet channel, and exchange encrypted messages.
//!
//! This example shows how to:
//! - Run the relay server inside the process
//! - Create a channel and surface its pairing info (QR/deeplink payload)
//! - Join the channel from the other side
//! - Watch the notification stream and send application payloads

use pairlink::relay::RelayServer;
use pairlink::{
    ChannelMetadata, ChannelNotification, ConnectionState, MemorySessionStore, NotificationKind,
    OriginatorInfo, PairlinkConfig, SecureChannel, WalletInfo,
};
use tokio::sync::mpsc::UnboundedReceiver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("🔐 Pairlink - Pairing Demo");
    println!("==========================");

    // Run the relay inside this process; real deployments run pairlink-relay.
    let mut config = PairlinkConfig::default();
    config.relay.listen_addr = "127.0.0.1:0".to_string();
    let server = RelayServer::bind(&config.relay).await?;
    config.relay.server_url = server.local_addr()?.to_string();
    tokio::spawn(server.run());
    println!("🚀 Relay listening on {}", config.relay.server_url);

    // Dapp side: create the channel and surface the pairing payload.
    let dapp_metadata = ChannelMetadata {
        originator_info: OriginatorInfo {
            url: "https://dapp.example".to_string(),
            title: "Demo Dapp".to_string(),
            platform: "web".to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        ..ChannelMetadata::default()
    };
    let (dapp, mut dapp_rx) = SecureChannel::new(
        &config,
        dapp_metadata,
        Box::new(MemorySessionStore::new()),
    )
    .await?;
    let pairing = dapp.generate_channel_id_connect()?;
    println!("\n📱 Pairing payload (share via QR code or deeplink):");
    println!("   channel: {}", pairing.channel_id);
    println!("   pubkey:  {}", pairing.public_key);

    // Wallet side: join with the out-of-band payload.
    let wallet_metadata = ChannelMetadata {
        wallet_info: WalletInfo {
            name: "Demo Wallet".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: "cli".to_string(),
        },
        ..ChannelMetadata::default()
    };
    let (wallet, mut wallet_rx) = SecureChannel::new(
        &config,
        wallet_metadata,
        Box::new(MemorySessionStore::new()),
    )
    .await?;
    wallet.connect_to_channel(pairing.channel_id, &pairing.public_key)?;

    wait_for_state(&mut dapp_rx, ConnectionState::Linked).await;
    wait_for_state(&mut wallet_rx, ConnectionState::Linked).await;
    println!("\n🤝 Key exchange complete, channel linked");

    // Traffic is end-to-end encrypted; the relay only sees opaque base64.
    dapp.send(b"eth_requestAccounts")?;
    let request = next_payload(&mut wallet_rx).await;
    println!("📥 Wallet received: {}", String::from_utf8_lossy(&request));

    wallet.send(b"0x51Ac4E8821F3e0b1E9fc6F9d2a8cE0cF1BcD3eAa")?;
    let response = next_payload(&mut dapp_rx).await;
    println!("📥 Dapp received:   {}", String::from_utf8_lossy(&response));

    // Tear the pairing down for good; the wallet sees it too.
    dapp.terminate();
    wait_for_state(&mut wallet_rx, ConnectionState::Terminated).await;
    println!("\n🛑 Pairing terminated on both sides");
    println!("🎉 Demo completed successfully!");
    Ok(())
}

async fn wait_for_state(
    rx: &mut UnboundedReceiver<ChannelNotification>,
    state: ConnectionState,
) {
    while let Some(notification) = rx.recv().await {
        if notification.state == state {
            return;
        }
    }
    panic!("notification stream ended before reaching {state}");
}

async fn next_payload(rx: &mut UnboundedReceiver<ChannelNotification>) -> Vec<u8> {
    while let Some(notification) = rx.recv().await {
        if let NotificationKind::Message { payload } = notification.kind {
            return payload;
        }
    }
    panic!("notification stream ended before a message arrived");
}
