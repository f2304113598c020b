use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use parley_core::{AppConfig, AppState, GatewayConfig};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn sockets_over_capacity_are_closed_with_try_again_later() -> anyhow::Result<()> {
    let (gateway, _hub) = parley_core::hub::spawn(GatewayConfig::default());
    let config = AppConfig {
        max_connections: 1,
        ..AppConfig::default()
    };
    let app = parley_ws::gateway_router().with_state(AppState::new(gateway, config));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/socket", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let (_first, _) = connect_async(&url).await?;
    // Let the first socket task claim its slot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut second, _) = connect_async(&url).await?;
    let frame = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .context("timed out waiting for close")?
        .context("socket ended without a close frame")??;
    let Message::Close(Some(close)) = frame else {
        anyhow::bail!("expected a close frame, got {frame:?}");
    };
    assert_eq!(u16::from(close.code), 1013);
    Ok(())
}
