//! Channel relay flows: join rosters, broadcast exclusion, channel
//! switching, and member departure notifications.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn relay_between_two_members() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    let mut alpha = TestClient::connect(server.addr()).await?;
    let roster = alpha.join("room1", "master").await?;
    assert_eq!(roster, json!([]));

    let mut beta = TestClient::connect(server.addr()).await?;
    let roster = beta.join("room1", "slave").await?;
    assert_eq!(roster, json!([{"id": 0, "connection_type": "master"}]));

    let joined = alpha.recv_expect("client_joined").await?;
    assert_eq!(joined["client"], json!({"id": 1, "connection_type": "slave"}));

    alpha.send(&json!({"type": "key", "scan_code": 42})).await?;
    let relayed = beta.recv().await?;
    assert_eq!(
        relayed,
        json!({"type": "key", "scan_code": 42, "origin": 0})
    );

    // The sender must not receive its own broadcast.
    assert!(alpha.recv_timeout(Duration::from_millis(300)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn relay_overrides_a_spoofed_origin() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    let mut alpha = TestClient::connect(server.addr()).await?;
    alpha.join("room1", "master").await?;
    let mut beta = TestClient::connect(server.addr()).await?;
    beta.join("room1", "slave").await?;
    alpha.recv_expect("client_joined").await?;

    beta.send(&json!({"type": "speech", "origin": 999})).await?;
    let relayed = alpha.recv().await?;
    assert_eq!(relayed["origin"], json!(1));
    Ok(())
}

#[tokio::test]
async fn relay_fans_out_to_all_other_members() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    let mut alpha = TestClient::connect(server.addr()).await?;
    alpha.join("big", "master").await?;
    let mut beta = TestClient::connect(server.addr()).await?;
    beta.join("big", "slave").await?;
    let mut gamma = TestClient::connect(server.addr()).await?;
    let roster = gamma.join("big", "slave").await?;
    assert_eq!(roster.as_array().map(Vec::len), Some(2));

    alpha.recv_expect("client_joined").await?; // beta
    alpha.recv_expect("client_joined").await?; // gamma
    beta.recv_expect("client_joined").await?; // gamma

    alpha.send(&json!({"type": "key", "scan_code": 7})).await?;
    assert_eq!(beta.recv().await?["scan_code"], json!(7));
    assert_eq!(gamma.recv().await?["scan_code"], json!(7));
    Ok(())
}

#[tokio::test]
async fn switching_channels_parts_the_old_one() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    let mut alpha = TestClient::connect(server.addr()).await?;
    alpha.join("room1", "master").await?;
    let mut beta = TestClient::connect(server.addr()).await?;
    beta.join("room1", "slave").await?;
    alpha.recv_expect("client_joined").await?;

    alpha.join("room2", "master").await?;

    let left = beta.recv_expect("client_left").await?;
    assert_eq!(
        left["client"],
        json!({"id": 0, "connection_type": "master"})
    );
    assert_eq!(left["reason"], json!("Client switched channels"));

    // room1 traffic no longer reaches the switcher.
    beta.send(&json!({"type": "key", "scan_code": 1})).await?;
    assert!(alpha.recv_timeout(Duration::from_millis(300)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn duplicate_join_of_current_channel_is_rejected_but_not_fatal() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    let mut alpha = TestClient::connect(server.addr()).await?;
    alpha.join("room1", "master").await?;
    let mut beta = TestClient::connect(server.addr()).await?;
    beta.join("room1", "slave").await?;
    alpha.recv_expect("client_joined").await?;

    alpha
        .send(&json!({"type": "join", "channel": "room1", "connection_type": "master"}))
        .await?;
    let reply = alpha.recv_expect("error").await?;
    assert_eq!(reply["error"], json!("Already in channel"));

    // The session survives and stays in the channel.
    alpha.send(&json!({"type": "key", "scan_code": 3})).await?;
    assert_eq!(beta.recv().await?["scan_code"], json!(3));
    Ok(())
}

#[tokio::test]
async fn disconnect_notifies_remaining_members() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    let mut alpha = TestClient::connect(server.addr()).await?;
    alpha.join("room1", "master").await?;
    let mut beta = TestClient::connect(server.addr()).await?;
    beta.join("room1", "slave").await?;
    alpha.recv_expect("client_joined").await?;

    drop(beta);

    let left = alpha.recv_expect("client_left").await?;
    assert_eq!(left["client"]["id"], json!(1));
    assert_eq!(left["reason"], json!("Client disconnected"));
    Ok(())
}

#[tokio::test]
async fn channel_is_recreated_after_everyone_leaves() -> anyhow::Result<()> {
    let server = TestServer::spawn_default().await?;

    {
        let mut alpha = TestClient::connect(server.addr()).await?;
        alpha.join("room1", "master").await?;
    }

    // Allow the channel task to garbage-collect itself, then reuse the name.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry().stats().num_channels, 0);

    let mut beta = TestClient::connect(server.addr()).await?;
    let roster = beta.join("room1", "slave").await?;
    assert_eq!(roster, json!([]));
    assert_eq!(server.registry().stats().num_channels, 1);
    Ok(())
}
