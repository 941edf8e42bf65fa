//! Integration tests for the Redis report queue.
//!
//! These tests require a live Redis server. They skip with a message when none
//! is reachable at `TRIAGE_TEST_REDIS_HOST`/`TRIAGE_TEST_REDIS_PORT` (or
//! localhost:6379).

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use triage_core::config::QueueConfig;
use triage_core::{RedisQueue, ReportQueue};

fn queue_config(tag: &str) -> QueueConfig {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    QueueConfig {
        host: std::env::var("TRIAGE_TEST_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("TRIAGE_TEST_REDIS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(6379),
        name: format!("triage_test_{}_{}_{}", tag, std::process::id(), nanos),
        poll_timeout_secs: 1,
        reconnect_delay_secs: 1,
    }
}

/// Returns None if Redis is unavailable
async fn make_queue(tag: &str) -> Option<(RedisQueue, QueueConfig)> {
    let config = queue_config(tag);
    let mut queue = RedisQueue::new(&config).ok()?;
    queue.ping().await.ok()?;
    Some((queue, config))
}

/// Push the way the ingest API does.
async fn lpush(config: &QueueConfig, body: &[u8]) {
    let client = redis::Client::open(config.url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: i64 = redis::cmd("LPUSH")
        .arg(&config.name)
        .arg(body)
        .query_async(&mut conn)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pop_returns_messages_in_arrival_order() {
    let (mut queue, config) = match make_queue("order").await {
        Some(q) => q,
        None => {
            eprintln!("Skipping test_pop_returns_messages_in_arrival_order: Redis unavailable");
            return;
        }
    };

    lpush(&config, br#"{"errorMessage": "first"}"#).await;
    lpush(&config, br#"{"errorMessage": "second"}"#).await;

    let first = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .expect("pop timed out")
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .expect("pop timed out")
        .unwrap();

    assert_eq!(first, br#"{"errorMessage": "first"}"#.to_vec());
    assert_eq!(second, br#"{"errorMessage": "second"}"#.to_vec());
}

#[tokio::test]
async fn test_pop_waits_across_empty_windows() {
    let (mut queue, config) = match make_queue("idle").await {
        Some(q) => q,
        None => {
            eprintln!("Skipping test_pop_waits_across_empty_windows: Redis unavailable");
            return;
        }
    };

    let producer_config = config.clone();
    let producer = tokio::spawn(async move {
        // Longer than the 1s server-side window, so the first BRPOP comes back empty.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        lpush(&producer_config, b"late").await;
    });

    let body = tokio::time::timeout(Duration::from_secs(10), queue.pop())
        .await
        .expect("pop did not return after the message arrived")
        .unwrap();

    assert_eq!(body, b"late".to_vec());
    producer.await.unwrap();
}
