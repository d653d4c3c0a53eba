use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use kithara_cache::{
    Cache, CacheError, CacheListener, CacheSpan, ContentMetadataMutations, NoOpCacheEvictor,
    SimpleCache,
};
use parking_lot::Mutex;
use rstest::*;
use tempfile::TempDir;

use crate::common::fixtures::{
    FlakyIndexStorage, add_cache, add_span_unlocked, assert_cached_data, span_files, temp_dir,
    tracing_setup,
};

const KEY_1: &str = "key1";
const KEY_2: &str = "key2";

fn open(dir: &TempDir) -> SimpleCache {
    SimpleCache::new(dir.path(), NoOpCacheEvictor).unwrap()
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn cached_length_sign_convention(_tracing_setup: (), temp_dir: TempDir) {
    let cache = open(&temp_dir);
    assert_eq!(cache.cached_length(KEY_1, 0, 100).unwrap(), -100);

    let hole = cache.start_read_write(KEY_1, 0, None).unwrap();
    assert_eq!(cache.cached_length(KEY_1, 0, 100).unwrap(), -100);

    add_cache(&cache, KEY_1, 0, 15).unwrap();
    assert_eq!(cache.cached_length(KEY_1, 0, 100).unwrap(), 15);

    add_cache(&cache, KEY_1, 15, 35).unwrap();
    assert_eq!(cache.cached_length(KEY_1, 0, 100).unwrap(), 50);

    add_cache(&cache, KEY_1, 60, 10).unwrap();
    assert_eq!(cache.cached_length(KEY_1, 0, 100).unwrap(), 50);
    assert_eq!(cache.cached_length(KEY_1, 55, 100).unwrap(), -5);
    assert_eq!(cache.cached_length(KEY_1, 55, 2).unwrap(), -2);
    assert_eq!(cache.cached_length(KEY_1, 60, 100).unwrap(), 10);

    assert_eq!(cache.cached_bytes(KEY_1, 0, Some(100)).unwrap(), 60);
    assert!(cache.is_cached(KEY_1, 10, 40).unwrap());
    assert!(!cache.is_cached(KEY_1, 10, 41).unwrap());

    cache.release_hole_span(&hole).unwrap();
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn committed_spans_survive_reopen(_tracing_setup: (), temp_dir: TempDir) {
    let (spans_before, uid_before) = {
        let cache = open(&temp_dir);
        add_span_unlocked(&cache, KEY_1, 0, 15);
        add_span_unlocked(&cache, KEY_1, 15, 15);
        add_span_unlocked(&cache, KEY_2, 100, 7);
        cache
            .apply_content_metadata_mutations(
                KEY_1,
                &ContentMetadataMutations::new()
                    .set_content_length(30)
                    .set_redirected_uri("https://cdn.example/a"),
            )
            .unwrap();

        let spans = cache.cached_spans(KEY_1).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].position, 0);
        assert_eq!(spans[1].position, 15);

        let uid = cache.uid().unwrap();
        cache.release().unwrap();
        (spans, uid)
    };

    let cache = open(&temp_dir);
    assert_eq!(cache.uid(), Some(uid_before));
    assert_eq!(cache.cached_spans(KEY_1).unwrap(), spans_before);
    assert_eq!(cache.cached_length(KEY_2, 100, 100).unwrap(), 7);
    assert_eq!(cache.cache_space().unwrap(), 37);

    let metadata = cache.content_metadata(KEY_1).unwrap();
    assert_eq!(metadata.content_length(), Some(30));
    assert_eq!(metadata.redirected_uri(), Some("https://cdn.example/a"));

    let mut keys = cache.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec![KEY_1.to_string(), KEY_2.to_string()]);
    assert_cached_data(&cache, KEY_1, 0, 30);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn metadata_without_spans_survives_reopen(temp_dir: TempDir) {
    {
        let cache = open(&temp_dir);
        cache
            .apply_content_metadata_mutations(KEY_1, &ContentMetadataMutations::new().set_u64("n", 5))
            .unwrap();
    }
    let cache = open(&temp_dir);
    assert_eq!(cache.content_metadata(KEY_1).unwrap().get_u64("n"), Some(5));
    assert!(cache.cached_spans(KEY_1).unwrap().is_empty());
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn second_instance_on_locked_dir_fails(temp_dir: TempDir) {
    let first = open(&temp_dir);

    let second = SimpleCache::new(temp_dir.path(), NoOpCacheEvictor);
    assert!(matches!(second, Err(CacheError::Locked { .. })));

    first.release().unwrap();
    let third = SimpleCache::new(temp_dir.path(), NoOpCacheEvictor).unwrap();
    assert!(third.uid().is_some());
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn dropping_instance_unlocks_dir(temp_dir: TempDir) {
    drop(open(&temp_dir));
    open(&temp_dir);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn file_in_place_of_dir_disables_cache(temp_dir: TempDir) {
    let path = temp_dir.path().join("occupied");
    std::fs::write(&path, b"not a directory").unwrap();

    let cache = SimpleCache::new(&path, NoOpCacheEvictor).unwrap();
    assert_eq!(cache.uid(), None);

    assert!(matches!(
        cache.start_read_write(KEY_1, 0, None),
        Err(CacheError::Initialization(_))
    ));
    assert!(matches!(
        cache.start_read_write_non_blocking(KEY_1, 0, None),
        Err(CacheError::Initialization(_))
    ));
    assert!(matches!(
        cache.apply_content_metadata_mutations(KEY_1, &ContentMetadataMutations::new()),
        Err(CacheError::Initialization(_))
    ));
    assert!(cache.keys().unwrap().is_empty());
    cache.release().unwrap();
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn use_after_release_fails(temp_dir: TempDir) {
    let cache = open(&temp_dir);
    let span_path = add_span_unlocked(&cache, KEY_1, 0, 10);
    cache.release().unwrap();

    assert!(matches!(cache.cached_spans(KEY_1), Err(CacheError::Released)));
    assert!(matches!(cache.commit_file(&span_path, 10), Err(CacheError::Released)));
    assert!(matches!(cache.start_read_write(KEY_1, 0, None), Err(CacheError::Released)));
    assert!(matches!(cache.remove_resource(KEY_1), Err(CacheError::Released)));
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn non_blocking_returns_none_while_hole_held(temp_dir: TempDir) {
    let cache = open(&temp_dir);
    let hole = cache.start_read_write_non_blocking(KEY_1, 0, None).unwrap().unwrap();

    assert!(cache.start_read_write_non_blocking(KEY_1, 0, None).unwrap().is_none());
    assert!(cache.start_read_write_non_blocking(KEY_1, 1_000, Some(1)).unwrap().is_none());

    cache.release_hole_span(&hole).unwrap();
    let again = cache.start_read_write_non_blocking(KEY_1, 0, None).unwrap();
    assert!(again.is_some());
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn blocking_caller_gets_cached_span_after_writer_commits(temp_dir: TempDir) {
    let cache = Arc::new(open(&temp_dir));
    let hole = cache.start_read_write(KEY_1, 0, Some(10)).unwrap();

    let reader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.start_read_write(KEY_1, 0, Some(10)).unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    add_cache(cache.as_ref(), KEY_1, 0, 10).unwrap();
    cache.release_hole_span(&hole).unwrap();

    let span = reader.join().unwrap();
    assert!(span.is_cached);
    assert_eq!(span.length, Some(10));
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn disjoint_holes_do_not_block_each_other(temp_dir: TempDir) {
    let cache = Arc::new(open(&temp_dir));
    let first = cache.start_read_write(KEY_1, 0, Some(50)).unwrap();

    let writers: Vec<_> = (1..5u64)
        .map(|i| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let hole = cache.start_read_write(KEY_1, i * 50, Some(50)).unwrap();
                add_cache(cache.as_ref(), KEY_1, i * 50, 50).unwrap();
                cache.release_hole_span(&hole).unwrap();
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    add_cache(cache.as_ref(), KEY_1, 0, 50).unwrap();
    cache.release_hole_span(&first).unwrap();
    assert_eq!(cache.cached_length(KEY_1, 0, 1_000).unwrap(), 250);
    assert_cached_data(cache.as_ref(), KEY_1, 0, 250);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn releasing_cached_span_keeps_it(temp_dir: TempDir) {
    let cache = open(&temp_dir);
    add_span_unlocked(&cache, KEY_1, 0, 10);

    let span = cache.start_read_write(KEY_1, 0, None).unwrap();
    assert!(span.is_cached);
    cache.release_hole_span(&span).unwrap();

    assert!(cache.cached_spans(KEY_1).unwrap().contains(&span));
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn remove_span_is_applied_even_if_store_fails(temp_dir: TempDir) {
    let (storage, fail) = FlakyIndexStorage::new(temp_dir.path());
    let cache = SimpleCache::builder()
        .cache_dir(temp_dir.path())
        .index_storage(storage)
        .build()
        .unwrap();
    let file = add_span_unlocked(&cache, KEY_1, 0, 10);
    let span = cache.cached_spans(KEY_1).unwrap().remove(0);

    fail.store(true, Ordering::SeqCst);
    assert!(cache.remove_span(&span).is_err());

    assert!(cache.cached_spans(KEY_1).unwrap().is_empty());
    assert!(!file.exists());
    assert_eq!(cache.cache_space().unwrap(), 0);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn remove_resource_drops_spans_and_metadata(temp_dir: TempDir) {
    let cache = open(&temp_dir);
    add_span_unlocked(&cache, KEY_1, 0, 10);
    add_span_unlocked(&cache, KEY_1, 20, 10);
    cache
        .apply_content_metadata_mutations(KEY_1, &ContentMetadataMutations::new().set_content_length(30))
        .unwrap();

    cache.remove_resource(KEY_1).unwrap();

    assert!(cache.cached_spans(KEY_1).unwrap().is_empty());
    assert!(cache.content_metadata(KEY_1).unwrap().is_empty());
    assert!(cache.keys().unwrap().is_empty());
    assert!(span_files(temp_dir.path()).is_empty());
}

#[derive(Default)]
struct Recorder {
    added: Mutex<Vec<CacheSpan>>,
    removed: Mutex<Vec<CacheSpan>>,
    touched: AtomicUsize,
}

impl CacheListener for Recorder {
    fn on_span_added(&self, span: &CacheSpan) {
        self.added.lock().push(span.clone());
    }

    fn on_span_removed(&self, span: &CacheSpan) {
        self.removed.lock().push(span.clone());
    }

    fn on_span_touched(&self, _old: &CacheSpan, _new: &CacheSpan) {
        self.touched.fetch_add(1, Ordering::SeqCst);
    }
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn listeners_see_existing_spans_then_key_events(temp_dir: TempDir) {
    let cache = open(&temp_dir);
    add_span_unlocked(&cache, KEY_1, 0, 5);

    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn CacheListener> = Arc::clone(&recorder) as Arc<dyn CacheListener>;
    let existing = cache.add_listener(KEY_1, Arc::clone(&listener)).unwrap();
    assert_eq!(existing.len(), 1);

    add_span_unlocked(&cache, KEY_1, 5, 5);
    add_span_unlocked(&cache, KEY_2, 0, 5);
    cache.remove_span(&existing[0]).unwrap();

    let added: Vec<u64> = recorder.added.lock().iter().map(|s| s.position).collect();
    assert_eq!(added, vec![0, 5]);
    assert_eq!(*recorder.removed.lock(), existing);
    assert_eq!(recorder.touched.load(Ordering::SeqCst), 0);

    cache.remove_listener(KEY_1, &listener);
    add_span_unlocked(&cache, KEY_1, 10, 5);
    assert_eq!(recorder.added.lock().len(), 2);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn unaccounted_files_are_wiped_when_index_is_lost(temp_dir: TempDir) {
    {
        let cache = open(&temp_dir);
        add_span_unlocked(&cache, KEY_1, 0, 10);
        add_span_unlocked(&cache, KEY_2, 0, 10);
    }
    assert_eq!(span_files(temp_dir.path()).len(), 2);

    std::fs::remove_file(temp_dir.path().join(kithara_cache::INDEX_FILE_NAME)).unwrap();

    let cache = open(&temp_dir);
    assert!(cache.keys().unwrap().is_empty());
    assert!(span_files(temp_dir.path()).is_empty());
}
