//! End-to-end scenarios driving the loader against real image files.

use pixelbank::cache::{ImageCache, MemoryBudgetConfig};
use pixelbank::decoder::{DecodeError, DecodedPixels, FileDecoder, PixelDecoder};
use pixelbank::image::{BasicImage, BasicImageFactory, ClientImage};
use pixelbank::loader::{ImageLoader, LoadStatus, LoaderConfig, TryGetStatus};
use pixelbank::resize::NearestNeighborResizer;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 80, 120, 255]));
    img.save(&path).expect("write fixture png");
    path
}

fn new_loader(cache: &ImageCache<BasicImage>, max_threads: usize) -> ImageLoader<BasicImage> {
    ImageLoader::new(
        cache.clone(),
        Arc::new(BasicImageFactory),
        LoaderConfig::new().with_max_threads(max_threads),
    )
}

#[test]
fn basic_load_accounts_for_source_and_variant() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "frame.png", 1920, 1080);

    let cache = ImageCache::new(MemoryBudgetConfig::new().with_max_memory(16 * 1024 * 1024));
    let loader = new_loader(&cache, 4);

    let (tx, rx) = mpsc::channel();
    let status = loader.try_get_image(&path, move |result| {
        tx.send(result).unwrap();
    });
    assert_eq!(status, TryGetStatus::PlacedNewTaskInQueue);

    let result = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(result.status, LoadStatus::Success, "{}", result.error_message);

    let handle = result.image.expect("success carries a handle");
    assert_eq!(handle.width(), 1920);
    assert_eq!(handle.height(), 1080);

    // One entry holding the decoded source plus the native-size variant.
    assert_eq!(cache.entry_count(), 1);
    assert_eq!(cache.current_usage(), 1920 * 1080 * 4 * 2);

    // Dropping the only strong handle releases the variant and, with the
    // entry's variant map empty, the source as well.
    drop(handle);
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.current_usage(), 0);
}

#[test]
fn duplicate_requests_collapse_to_one_task_and_one_callback() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "dup.png", 32, 32);

    let cache = ImageCache::new(MemoryBudgetConfig::default());
    let loader = new_loader(&cache, 4);

    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();

    let first = loader.try_get_image_at_size(&path, 16, 16, move |result| {
        tx.send(result).unwrap();
    });
    let second = loader.try_get_image_at_size(&path, 16, 16, move |result| {
        tx2.send(result).unwrap();
    });

    assert_eq!(first, TryGetStatus::PlacedNewTaskInQueue);
    assert_eq!(second, TryGetStatus::TaskAlreadyExistsAndIsQueued);

    // Exactly one callback fires: the winner's. The collapsed request gets
    // none.
    let result = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(result.status, LoadStatus::Success);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn missing_file_fails_and_leaves_cache_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("@does_not_exist.jpg");

    let cache = ImageCache::new(MemoryBudgetConfig::default());
    let loader = new_loader(&cache, 4);

    let (tx, rx) = mpsc::channel();
    let requested = path.clone();
    loader.try_get_image(&path, move |result| {
        tx.send(result).unwrap();
    });

    let result = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(result.status, LoadStatus::FailedToLoad);
    assert!(result.image.is_none());
    assert!(
        result
            .error_message
            .starts_with(requested.to_str().unwrap()),
        "error message should begin with the path: {}",
        result.error_message
    );

    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.current_usage(), 0);
}

#[test]
fn budget_exhaustion_rejects_overflow_and_stays_within_budget() {
    let dir = TempDir::new().unwrap();
    let count = 8u32;
    let paths: Vec<PathBuf> = (0..count)
        .map(|i| write_png(dir.path(), &format!("img_{i}.png"), 16, 16))
        .collect();

    // Each native load charges source + variant = 2 * 16*16*4 bytes. Budget
    // covers only half of the submitted set.
    let per_image = 2 * 16 * 16 * 4u64;
    let budget = u64::from(count) * per_image / 2;

    let cache = ImageCache::new(MemoryBudgetConfig::new().with_max_memory(budget));
    let loader = new_loader(&cache, 4);

    let (tx, rx) = mpsc::channel();
    for path in &paths {
        let tx = tx.clone();
        loader.try_get_image(path, move |result| {
            tx.send(result).unwrap();
        });
    }
    drop(tx);

    let mut successes = Vec::new();
    let mut out_of_memory = 0;
    for _ in 0..count {
        let result = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        match result.status {
            LoadStatus::Success => successes.push(result.image.unwrap()),
            LoadStatus::OutOfMemory => out_of_memory += 1,
            LoadStatus::FailedToLoad => panic!("unexpected failure: {}", result.error_message),
        }
    }

    assert!(out_of_memory >= 1, "at least one admission must be rejected");
    assert!(cache.current_usage() <= budget);
    assert_eq!(successes.len() + out_of_memory, count as usize);
}

#[test]
fn thread_cap_is_never_exceeded() {
    /// Wraps the file decoder with a delay so worker overlap is observable.
    struct SlowDecoder {
        inner: FileDecoder,
        delay: Duration,
    }

    impl PixelDecoder for SlowDecoder {
        fn read_file(&self, path: &Path) -> Result<DecodedPixels, DecodeError> {
            thread::sleep(self.delay);
            self.inner.read_file(path)
        }
    }

    let dir = TempDir::new().unwrap();
    let paths: Vec<PathBuf> = (0..10)
        .map(|i| write_png(dir.path(), &format!("cap_{i}.png"), 8, 8))
        .collect();

    let cache = ImageCache::new(MemoryBudgetConfig::default());
    let loader = ImageLoader::with_collaborators(
        cache.clone(),
        Arc::new(BasicImageFactory),
        Arc::new(SlowDecoder {
            inner: FileDecoder::new(),
            delay: Duration::from_millis(40),
        }),
        Arc::new(NearestNeighborResizer::new()),
        LoaderConfig::new().with_max_threads(2),
    );

    let (tx, rx) = mpsc::channel();
    for path in &paths {
        let tx = tx.clone();
        loader.try_get_image(path, move |result| {
            tx.send(result).unwrap();
        });
    }
    drop(tx);

    // Poll the governor while the batch drains.
    let mut peak = 0;
    let mut completed = 0;
    let deadline = Instant::now() + RECV_TIMEOUT;
    while completed < paths.len() {
        assert!(Instant::now() < deadline, "batch did not complete in time");
        peak = peak.max(loader.running_threads());
        assert!(
            loader.running_threads() <= 2,
            "thread cap exceeded: {}",
            loader.running_threads()
        );
        while let Ok(result) = rx.try_recv() {
            assert_eq!(result.status, LoadStatus::Success, "{}", result.error_message);
            completed += 1;
        }
        thread::sleep(Duration::from_millis(2));
    }

    assert!(peak >= 1, "workers should have been observed running");
    assert_eq!(completed, paths.len());
}

#[test]
fn lifetime_eviction_keeps_only_referenced_entries() {
    let dir = TempDir::new().unwrap();
    let path_a = write_png(dir.path(), "keep.png", 24, 24);
    let path_b = write_png(dir.path(), "drop.png", 12, 12);

    let cache = ImageCache::new(MemoryBudgetConfig::default());
    let loader = new_loader(&cache, 4);

    // Load A and keep its handle alive.
    let (tx_a, rx_a) = mpsc::channel();
    loader.try_get_image(&path_a, move |result| {
        tx_a.send(result).unwrap();
    });
    let result_a = rx_a.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(result_a.status, LoadStatus::Success);
    let handle_a = result_a.image.unwrap();

    // Load B and drop its handle inside the callback.
    let (tx_b, rx_b) = mpsc::channel();
    loader.try_get_image(&path_b, move |result| {
        let status = result.status;
        drop(result);
        tx_b.send(status).unwrap();
    });
    assert_eq!(rx_b.recv_timeout(RECV_TIMEOUT).unwrap(), LoadStatus::Success);

    // Only A remains: its source plus the native variant held by handle_a.
    assert_eq!(cache.entry_count(), 1);
    assert_eq!(cache.current_usage(), 24 * 24 * 4 * 2);

    drop(handle_a);
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.current_usage(), 0);
}

#[test]
fn repeated_request_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "again.png", 20, 10);

    let cache = ImageCache::new(MemoryBudgetConfig::default());
    let loader = new_loader(&cache, 2);

    let (tx, rx) = mpsc::channel();
    loader.try_get_image_at_size(&path, 10, 5, move |result| {
        tx.send(result).unwrap();
    });
    let first = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(first.status, LoadStatus::Success);
    let first_handle = first.image.unwrap();

    let usage_after_first = cache.current_usage();

    // The second request resolves to the exact cached variant.
    let (tx, rx) = mpsc::channel();
    loader.try_get_image_at_size(&path, 10, 5, move |result| {
        tx.send(result).unwrap();
    });
    let second = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(second.status, LoadStatus::Success);
    let second_handle = second.image.unwrap();

    assert!(Arc::ptr_eq(&first_handle, &second_handle));
    assert_eq!(cache.current_usage(), usage_after_first);
}

#[test]
fn callbacks_survive_loader_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "late.png", 8, 8);

    let cache = ImageCache::new(MemoryBudgetConfig::default());
    let loader = new_loader(&cache, 1);

    let (tx, rx) = mpsc::channel();
    loader.try_get_image(&path, move |result| {
        tx.send(result).unwrap();
    });

    // Give the dispatcher a chance to start the worker, then drop the
    // loader. A started task finishes on its detached worker thread.
    thread::sleep(Duration::from_millis(50));
    drop(loader);

    if let Ok(result) = rx.recv_timeout(Duration::from_secs(2)) {
        assert_eq!(result.status, LoadStatus::Success);
    }
    // A task still queued at shutdown never starts; either outcome is
    // acceptable, the process must simply not hang or crash.
}
