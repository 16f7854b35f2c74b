//! Integration tests for the Redis coordination store.
//!
//! These tests need a reachable Redis named by `REDIS_URL` and are skipped
//! when it is unset. Run with
//! `REDIS_URL=redis://127.0.0.1/ cargo test --features redis-store --test redis_store`

#![cfg(feature = "redis-store")]

use std::time::Duration;

use admission_gate::store::redis::{RedisStore, RedisStoreConfig};
use admission_gate::store::{encode_counter, read_counter, BoundedIncrement, CoordinationStore};

/// Store with a prefix unique to this test and process, or `None` when no
/// Redis is configured.
async fn create_test_store(test_name: &str) -> Option<RedisStore> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("Skipping test: REDIS_URL not set");
        return None;
    };
    let config = RedisStoreConfig {
        key_prefix: format!("test:{}:{}:", std::process::id(), test_name),
    };
    Some(
        RedisStore::connect_with_config(&url, config)
            .await
            .expect("Failed to connect to Redis"),
    )
}

#[tokio::test]
async fn test_bounded_increment_stops_at_ceiling() {
    let Some(store) = create_test_store("bounded_incr").await else {
        return;
    };
    let ttl = Duration::from_secs(30);

    assert_eq!(store.increment_bounded("rl:k", 2, ttl).await, Ok(BoundedIncrement::Incremented(1)));
    assert_eq!(store.increment_bounded("rl:k", 2, ttl).await, Ok(BoundedIncrement::Incremented(2)));
    assert_eq!(store.increment_bounded("rl:k", 2, ttl).await, Ok(BoundedIncrement::AtCeiling(2)));
    assert_eq!(store.increment_bounded("rl:k", 2, ttl).await, Ok(BoundedIncrement::AtCeiling(2)));
    assert_eq!(read_counter(&store, "rl:k").await, Ok(2));

    // A raised ceiling continues from the stored count.
    assert_eq!(store.increment_bounded("rl:k", 3, ttl).await, Ok(BoundedIncrement::Incremented(3)));

    // A zero ceiling never creates the key.
    assert_eq!(store.increment_bounded("rl:zero", 0, ttl).await, Ok(BoundedIncrement::AtCeiling(0)));
    assert_eq!(store.get("rl:zero").await, Ok(None));

    store.delete("rl:k").await.unwrap();
}

#[tokio::test]
async fn test_bounded_increment_reads_encoded_counters() {
    let Some(store) = create_test_store("encoded_counter").await else {
        return;
    };
    let ttl = Duration::from_secs(30);

    store.set("rl:k", encode_counter(4), ttl).await.unwrap();
    assert_eq!(store.increment_bounded("rl:k", 5, ttl).await, Ok(BoundedIncrement::Incremented(5)));
    assert_eq!(store.increment_bounded("rl:k", 5, ttl).await, Ok(BoundedIncrement::AtCeiling(5)));

    store.delete("rl:k").await.unwrap();
}

#[tokio::test]
async fn test_keys_expire() {
    let Some(store) = create_test_store("expiry").await else {
        return;
    };
    let ttl = Duration::from_millis(100);

    store.set("cache:k", b"v".to_vec(), ttl).await.unwrap();
    assert_eq!(store.get("cache:k").await, Ok(Some(b"v".to_vec())));
    assert_eq!(store.increment_bounded("rl:k", 10, ttl).await, Ok(BoundedIncrement::Incremented(1)));
    assert_eq!(store.increment_bounded("rl:k", 10, ttl).await, Ok(BoundedIncrement::Incremented(2)));

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(store.get("cache:k").await, Ok(None));
    // The window counter starts over once its first increment's TTL lapses.
    assert_eq!(store.increment_bounded("rl:k", 10, ttl).await, Ok(BoundedIncrement::Incremented(1)));
}

#[tokio::test]
async fn test_compare_and_swap_on_absent_key() {
    let Some(store) = create_test_store("cas_absent").await else {
        return;
    };
    let ttl = Duration::from_secs(30);

    // Expecting a value that is not there fails without writing.
    assert_eq!(
        store.compare_and_swap("rev:sub:s1", Some(b"1".as_slice()), b"2".to_vec(), ttl).await,
        Ok(false)
    );
    assert_eq!(store.get("rev:sub:s1").await, Ok(None));

    assert_eq!(store.compare_and_swap("rev:sub:s1", None, b"1".to_vec(), ttl).await, Ok(true));
    // A second create loses.
    assert_eq!(store.compare_and_swap("rev:sub:s1", None, b"9".to_vec(), ttl).await, Ok(false));
    assert_eq!(store.get("rev:sub:s1").await, Ok(Some(b"1".to_vec())));

    store.delete("rev:sub:s1").await.unwrap();
}

#[tokio::test]
async fn test_compare_and_swap_on_present_key() {
    let Some(store) = create_test_store("cas_present").await else {
        return;
    };
    let ttl = Duration::from_secs(30);
    store.set("rev:sub:s1", b"1".to_vec(), ttl).await.unwrap();

    assert_eq!(
        store.compare_and_swap("rev:sub:s1", Some(b"9".as_slice()), b"2".to_vec(), ttl).await,
        Ok(false)
    );
    assert_eq!(store.get("rev:sub:s1").await, Ok(Some(b"1".to_vec())));

    assert_eq!(
        store.compare_and_swap("rev:sub:s1", Some(b"1".as_slice()), b"2".to_vec(), ttl).await,
        Ok(true)
    );
    assert_eq!(store.get("rev:sub:s1").await, Ok(Some(b"2".to_vec())));

    // The swap writes the new TTL.
    assert_eq!(
        store
            .compare_and_swap("rev:sub:s1", Some(b"2".as_slice()), b"3".to_vec(), Duration::from_millis(100))
            .await,
        Ok(true)
    );
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.get("rev:sub:s1").await, Ok(None));
}
