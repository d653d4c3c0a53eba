use std::time::Duration;

use kithara_cache::{
    Cache, CachedRegionTracker, ChunkIndex, LeastRecentlyUsedCacheEvictor, NoOpCacheEvictor,
    RegionEnd, SimpleCache,
};
use rstest::*;
use tempfile::TempDir;

use crate::common::fixtures::{add_span_unlocked, temp_dir};

const KEY: &str = "segment-7";

/// Five chunks of 20 bytes and 100 ms each, starting at byte 100.
#[fixture]
fn chunks() -> ChunkIndex {
    ChunkIndex::from_parts(
        &[20; 5],
        &[100, 120, 140, 160, 180],
        &[100_000; 5],
        &[0, 100_000, 200_000, 300_000, 400_000],
    )
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn tracker_follows_cache_writes(temp_dir: TempDir, chunks: ChunkIndex) {
    let cache = SimpleCache::new(temp_dir.path(), NoOpCacheEvictor).unwrap();
    let tracker = CachedRegionTracker::attach(&cache, KEY, chunks).unwrap();
    assert_eq!(tracker.region_end_time_ms(100), RegionEnd::NotCached);

    add_span_unlocked(&cache, KEY, 100, 10);
    assert_eq!(tracker.region_end_time_ms(101), RegionEnd::EndsAt { time_ms: 50 });
    assert_eq!(tracker.region_end_time_ms(111), RegionEnd::NotCached);

    add_span_unlocked(&cache, KEY, 110, 90);
    assert_eq!(tracker.regions(), vec![100..200]);
    assert_eq!(tracker.region_end_time_ms(150), RegionEnd::CachedToEnd);

    add_span_unlocked(&cache, "unrelated", 0, 500);
    assert_eq!(tracker.regions(), vec![100..200]);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn tracker_seeds_from_existing_spans(temp_dir: TempDir, chunks: ChunkIndex) {
    {
        let cache = SimpleCache::new(temp_dir.path(), NoOpCacheEvictor).unwrap();
        add_span_unlocked(&cache, KEY, 100, 40);
        add_span_unlocked(&cache, KEY, 160, 40);
    }

    let cache = SimpleCache::new(temp_dir.path(), NoOpCacheEvictor).unwrap();
    let tracker = CachedRegionTracker::attach(&cache, KEY, chunks).unwrap();
    assert_eq!(tracker.regions(), vec![100..140, 160..200]);
    assert_eq!(tracker.region_end_time_ms(100), RegionEnd::EndsAt { time_ms: 200 });
    assert_eq!(tracker.region_end_time_ms(150), RegionEnd::NotCached);
    assert_eq!(tracker.region_end_time_ms_at(350), RegionEnd::CachedToEnd);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn removed_and_evicted_spans_leave_regions(temp_dir: TempDir, chunks: ChunkIndex) {
    let cache = SimpleCache::new(temp_dir.path(), LeastRecentlyUsedCacheEvictor::new(60)).unwrap();
    let tracker = CachedRegionTracker::attach(&cache, KEY, chunks).unwrap();

    add_span_unlocked(&cache, KEY, 100, 20);
    std::thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, KEY, 120, 20);
    std::thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, KEY, 140, 20);
    assert_eq!(tracker.regions(), vec![100..160]);

    std::thread::sleep(Duration::from_millis(5));
    add_span_unlocked(&cache, KEY, 160, 20);
    assert_eq!(tracker.regions(), vec![120..180]);
    assert_eq!(tracker.region_end_time_ms(100), RegionEnd::NotCached);
    assert_eq!(tracker.region_end_time_ms(120), RegionEnd::EndsAt { time_ms: 400 });

    let middle = cache
        .cached_spans(KEY)
        .unwrap()
        .into_iter()
        .find(|s| s.position == 140)
        .unwrap();
    cache.remove_span(&middle).unwrap();
    assert_eq!(tracker.regions(), vec![120..140, 160..180]);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn detached_tracker_stops_updating(temp_dir: TempDir, chunks: ChunkIndex) {
    let cache = SimpleCache::new(temp_dir.path(), NoOpCacheEvictor).unwrap();
    let tracker = CachedRegionTracker::attach(&cache, KEY, chunks).unwrap();
    add_span_unlocked(&cache, KEY, 100, 20);

    tracker.detach(&cache);
    add_span_unlocked(&cache, KEY, 120, 20);
    assert_eq!(tracker.regions(), vec![100..120]);
}
