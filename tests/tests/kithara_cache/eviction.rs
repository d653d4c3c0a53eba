use std::{sync::atomic::Ordering, thread, time::Duration};

use kithara_cache::{Cache, LeastRecentlyUsedCacheEvictor, SimpleCache};
use rstest::*;
use tempfile::TempDir;

use crate::common::fixtures::{
    FlakyIndexStorage, add_cache, add_span_unlocked, assert_cached_data, span_files, temp_dir,
    tracing_setup,
};

const KEY: &str = "key";

fn positions(cache: &SimpleCache) -> Vec<u64> {
    cache
        .cached_spans(KEY)
        .unwrap()
        .iter()
        .map(|s| s.position)
        .collect()
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn eviction_survives_failed_index_store(_tracing_setup: (), temp_dir: TempDir) {
    let (storage, fail) = FlakyIndexStorage::new(temp_dir.path());
    let cache = SimpleCache::builder()
        .cache_dir(temp_dir.path())
        .evictor(LeastRecentlyUsedCacheEvictor::new(20))
        .index_storage(storage)
        .build()
        .unwrap();

    let hole = cache.start_read_write(KEY, 0, None).unwrap();
    add_cache(&cache, KEY, 0, 15).unwrap();

    fail.store(true, Ordering::SeqCst);
    assert!(add_cache(&cache, KEY, 15, 15).is_err());
    fail.store(false, Ordering::SeqCst);
    cache.release_hole_span(&hole).unwrap();

    assert_eq!(positions(&cache), vec![15]);
    assert_eq!(cache.cache_space().unwrap(), 15);
    assert_eq!(span_files(temp_dir.path()).len(), 1);
    assert_cached_data(&cache, KEY, 15, 15);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn oldest_span_is_evicted_first(temp_dir: TempDir) {
    let cache = SimpleCache::new(temp_dir.path(), LeastRecentlyUsedCacheEvictor::new(30)).unwrap();
    for i in 0..5u64 {
        add_span_unlocked(&cache, KEY, i * 10, 10);
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(positions(&cache), vec![20, 30, 40]);
    assert_eq!(cache.cache_space().unwrap(), 30);
    assert_eq!(span_files(temp_dir.path()).len(), 3);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn reading_a_span_protects_it_from_eviction(temp_dir: TempDir) {
    let cache = SimpleCache::new(temp_dir.path(), LeastRecentlyUsedCacheEvictor::new(30)).unwrap();
    let first_file = add_span_unlocked(&cache, KEY, 0, 10);
    thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, KEY, 10, 10);
    thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, KEY, 20, 10);
    thread::sleep(Duration::from_millis(5));

    let touched = cache.start_read_write(KEY, 0, Some(10)).unwrap();
    assert!(touched.is_cached);
    assert_ne!(touched.file.as_deref(), Some(first_file.as_path()));
    assert!(!first_file.exists());
    cache.release_hole_span(&touched).unwrap();

    thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, KEY, 30, 10);

    assert_eq!(positions(&cache), vec![0, 20, 30]);
    assert_cached_data(&cache, KEY, 0, 10);
    assert_cached_data(&cache, KEY, 20, 20);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn eviction_spans_keys(temp_dir: TempDir) {
    let cache = SimpleCache::new(temp_dir.path(), LeastRecentlyUsedCacheEvictor::new(25)).unwrap();
    add_span_unlocked(&cache, "a", 0, 10);
    thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, "b", 0, 10);
    thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, "c", 0, 10);

    let mut keys = cache.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(cache.cache_space().unwrap(), 20);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn budget_is_enforced_after_reopen(temp_dir: TempDir) {
    {
        let cache = SimpleCache::new(temp_dir.path(), LeastRecentlyUsedCacheEvictor::new(100)).unwrap();
        for i in 0..4u64 {
            add_span_unlocked(&cache, KEY, i * 10, 10);
            thread::sleep(Duration::from_millis(5));
        }
        cache.release().unwrap();
    }

    let cache = SimpleCache::new(temp_dir.path(), LeastRecentlyUsedCacheEvictor::new(20)).unwrap();
    assert_eq!(positions(&cache), vec![20, 30]);
    assert_eq!(span_files(temp_dir.path()).len(), 2);
}
