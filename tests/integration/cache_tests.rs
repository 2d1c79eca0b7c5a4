//! Result cache tests, both on the container directly and through the
//! manager.

use std::time::Duration;

use bytes::Bytes;

use pixelpipe::transform::{
    CachePut, ImageOrigin, ManagerConfig, Operation, OutputFormat, SizedLruCache,
    TransformRequest,
};

use super::test_utils::*;

fn blob(len: usize) -> Bytes {
    Bytes::from(vec![0u8; len])
}

#[test]
fn test_least_recently_used_is_evicted_first() {
    let mut cache: SizedLruCache<&str, Bytes> = SizedLruCache::with_capacity(100);

    cache.put("a", blob(40));
    cache.put("b", blob(40));
    assert!(cache.get(&"a").is_some());

    // "b" is now the least recently used entry
    match cache.put("c", blob(40)) {
        CachePut::Stored { evicted } => assert_eq!(evicted, vec!["b"]),
        CachePut::TooLarge => panic!("entry should fit"),
    }

    assert!(cache.contains(&"a"));
    assert!(!cache.contains(&"b"));
    assert!(cache.contains(&"c"));
    assert_eq!(cache.current_size(), 80);
}

#[test]
fn test_oversized_value_is_not_stored() {
    let mut cache: SizedLruCache<&str, Bytes> = SizedLruCache::with_capacity(100);
    cache.put("a", blob(60));

    assert!(matches!(cache.put("huge", blob(101)), CachePut::TooLarge));
    assert!(cache.contains(&"a"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.current_size(), 60);
}

#[test]
fn test_size_never_exceeds_capacity() {
    let mut cache: SizedLruCache<u32, Bytes> = SizedLruCache::with_capacity(1000);

    for i in 0..200u32 {
        cache.put(i, blob((i as usize * 37) % 300 + 1));
        assert!(cache.current_size() <= cache.capacity());
    }
}

fn grayscale(id: &str) -> TransformRequest {
    TransformRequest::new(id, vec![Operation::Grayscale], OutputFormat::Png)
}

#[tokio::test]
async fn test_results_larger_than_cache_are_served_but_not_kept() {
    let source = MockImageSource::new().with_image("a.png", create_test_png(32, 32));
    let config = ManagerConfig {
        cache_capacity: 16,
        ..test_manager_config(1, 4)
    };
    let manager = spawn_manager(&source, config);

    let first = manager.transform(grayscale("a.png")).await.unwrap();
    let second = manager.transform(grayscale("a.png")).await.unwrap();

    assert_eq!(first.origin, ImageOrigin::Transform);
    assert_eq!(second.origin, ImageOrigin::Transform);
    assert_eq!(first.data, second.data);
    assert_eq!(source.fetch_count(), 2);
    assert_eq!(manager.stats().await.unwrap().cache_entries, 0);
}

#[tokio::test]
async fn test_idle_entries_are_swept() {
    let source = MockImageSource::new().with_image("a.png", create_test_png(8, 8));
    let config = ManagerConfig {
        cache_ttl: Duration::ZERO,
        sweep_interval: Duration::from_millis(20),
        ..test_manager_config(1, 4)
    };
    let manager = spawn_manager(&source, config);

    manager.transform(grayscale("a.png")).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while manager.stats().await.unwrap().cache_entries > 0 {
        assert!(tokio::time::Instant::now() < deadline, "entry never swept");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let output = manager.transform(grayscale("a.png")).await.unwrap();
    assert_eq!(output.origin, ImageOrigin::Transform);
}
