/*
[INPUT]:  WebSocket reconnection test scenarios
[OUTPUT]: Reconnection, keepalive and cancellation behavior verification
[POS]:    Integration test layer - network resilience
[UPDATE]: When changing reconnection logic
*/

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tradestream_client::ws::OutboundFrame;
use tradestream_client::{ConnectionState, Endpoint, StreamPath};

use common::*;

fn close_frame() -> Option<OutboundFrame> {
    Some(OutboundFrame::Close {
        code: 1000,
        reason: "client disconnect".to_string(),
    })
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_is_linear_and_bounded() {
    init_tracing();
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let link = next_link(&mut links).await;
    wait_connected(&stream).await;

    for n in 1..=5 {
        connector.plan(Plan::Fail(format!("refused {n}")));
    }
    link.close(1006).await;

    let status = wait_for_status(&stream, |status| status.state.is_terminal()).await;
    assert_eq!(status.state, ConnectionState::Failed { attempts: 5 });
    assert!(status.state.is_disconnected());
    assert_eq!(status.last_error.as_deref(), Some("Transport error: refused 5"));

    let times = connector.attempt_times();
    assert_eq!(times.len(), 6);
    let gaps: Vec<Duration> = times.windows(2).map(|pair| pair[1] - pair[0]).collect();
    for (index, gap) in gaps.iter().skip(1).enumerate() {
        let expected = Duration::from_secs(5 * (index as u64 + 2));
        assert!(*gap >= expected && *gap < expected + Duration::from_secs(1), "gap {index}: {gap:?}");
    }

    // no sixth reconnect
    sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.attempt_count(), 6);
    assert_eq!(stream.state(), ConnectionState::Failed { attempts: 5 });
    assert_eq!(stream.stats().reconnects_scheduled, 5);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_counter_increments_per_failure() {
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let link = next_link(&mut links).await;
    wait_connected(&stream).await;

    connector.plan(Plan::Fail("refused".to_string()));
    link.close(1006).await;

    let status = wait_for_status(&stream, |status| status.attempt == 1).await;
    assert_eq!(status.state, ConnectionState::Reconnecting { attempt: 1 });

    let status = wait_for_status(&stream, |status| status.attempt == 2).await;
    assert_eq!(status.state, ConnectionState::Reconnecting { attempt: 2 });
    assert!(status.last_error.unwrap().contains("refused"));
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_resets_attempts() {
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let link = next_link(&mut links).await;
    wait_connected(&stream).await;

    connector.plan(Plan::Fail("refused".to_string()));
    link.close(1006).await;

    let link = next_link(&mut links).await;
    let status = wait_connected(&stream).await;
    assert_eq!(status.attempt, 0);
    assert_eq!(connector.attempt_count(), 3);

    let before = tokio::time::Instant::now();
    link.close(1011).await;
    let _link = next_link(&mut links).await;
    let waited = before.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_normal_server_close_does_not_reconnect() {
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let link = next_link(&mut links).await;
    wait_connected(&stream).await;

    link.close(1000).await;
    let status = wait_for_status(&stream, |status| status.state.is_disconnected()).await;
    assert_eq!(status.state, ConnectionState::Disconnected);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent_and_cancels_reconnect() {
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let link = next_link(&mut links).await;
    wait_connected(&stream).await;

    link.close(1006).await;
    wait_for_status(&stream, |status| status.attempt == 1).await;

    stream.disconnect();
    stream.disconnect();
    let status = wait_for_status(&stream, |status| status.state.is_disconnected()).await;
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.attempt, 0);

    sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(stream.stats().pings_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_and_stops_keepalive() {
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let mut link = next_link(&mut links).await;
    wait_connected(&stream).await;

    stream.disconnect();
    assert_eq!(link.next_frame().await, close_frame());
    wait_for_status(&stream, |status| status.state.is_disconnected()).await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(stream.stats().pings_sent, 0);
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_ping_every_thirty_seconds() {
    let (stream, _connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let mut link = next_link(&mut links).await;
    wait_connected(&stream).await;

    sleep(Duration::from_secs(29)).await;
    assert!(link.try_next_frame().is_none());

    sleep(Duration::from_secs(2)).await;
    let ping = link.next_envelope().await;
    assert_eq!(ping.kind, "ping");
    assert_eq!(ping.data, json!({}));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(link.next_envelope().await.kind, "ping");

    // no pong timeout by default
    assert!(stream.state().is_connected());
    assert_eq!(stream.stats().pings_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_pong_timeout_forces_reconnect() {
    let mut config = test_config();
    config.pong_timeout_ms = Some(5_000);
    let (stream, connector, mut links) = mock_stream(config);
    stream.connect(None);
    let mut link = next_link(&mut links).await;
    wait_connected(&stream).await;

    sleep(Duration::from_secs(31)).await;
    assert_eq!(link.next_envelope().await.kind, "ping");
    link.push(json!({"type": "pong", "data": {}})).await;

    sleep(Duration::from_secs(30)).await;
    assert_eq!(link.next_envelope().await.kind, "ping");
    assert!(stream.state().is_connected());

    let status = wait_for_status(&stream, |status| status.attempt == 1).await;
    assert_eq!(status.last_error.as_deref(), Some("pong timeout"));
    assert_eq!(link.next_frame().await, close_frame());

    let _second = next_link(&mut links).await;
    wait_connected(&stream).await;
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_schedules_reconnect() {
    let (stream, connector, mut links) = mock_stream(test_config());
    connector.plan(Plan::Hang);
    stream.connect(None);

    let status = wait_for_status(&stream, |status| status.attempt == 1).await;
    assert_eq!(status.state, ConnectionState::Reconnecting { attempt: 1 });
    assert!(status.last_error.unwrap().contains("timeout"));

    let _link = next_link(&mut links).await;
    wait_connected(&stream).await;
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reentrant_connect_replaces_previous_socket() {
    let (stream, connector, mut links) = mock_stream(test_config());
    stream.connect(None);
    let mut first = next_link(&mut links).await;
    let first_status = wait_connected(&stream).await;

    stream.connect(Some("fresh".to_string()));
    assert_eq!(first.next_frame().await, close_frame());

    let second = next_link(&mut links).await;
    let second_status = wait_connected(&stream).await;
    assert!(second_status.generation > first_status.generation);
    assert_eq!(second.url.query(), Some("token=fresh"));

    // the retired socket's pump is gone; a late close has no route back
    let _ = first
        .inbound_tx
        .send(tradestream_client::ws::TransportEvent::Closed {
            code: 1006,
            reason: "late".to_string(),
        })
        .await;
    second.push(price_frame("BTC", 1, 1)).await;
    let mut state = stream.watch_state();
    state.wait_for(|state| state.price("BTC").is_some()).await.unwrap();

    assert!(stream.state().is_connected());
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_endpoint_fails_without_retry() {
    let mut config = test_config();
    config.endpoint = Endpoint::new("bad host", true, StreamPath::Trading);
    let (stream, connector, _links) = mock_stream(config);

    stream.connect(None);
    let status = wait_for_status(&stream, |status| status.last_error.is_some()).await;
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.last_error.unwrap().starts_with("Invalid endpoint"));

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_failure_recovers() {
    let mut config = test_config();
    config.max_reconnect_attempts = 1;
    let (stream, connector, mut links) = mock_stream(config);
    connector.plan(Plan::Fail("down".to_string()));
    connector.plan(Plan::Fail("down".to_string()));

    stream.connect(None);
    let status = wait_for_status(&stream, |status| status.state.is_terminal()).await;
    assert_eq!(status.state, ConnectionState::Failed { attempts: 1 });

    stream.connect(None);
    let _link = next_link(&mut links).await;
    let status = wait_connected(&stream).await;
    assert_eq!(status.last_error, None);
    assert_eq!(connector.attempt_count(), 3);
}
