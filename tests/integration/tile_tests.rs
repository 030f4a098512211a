//! Tile fetches, the microcache fast path, pixel regions, and the opaque
//! tile handle.

use tilecache::pixel::bytes_to_f32_slice;
use tilecache::{AttrValue, CacheError, PixelFormat};

use super::test_utils::{cache_with, constant_image, gradient_u8, image_from_fn, MockFactory};

#[test]
fn test_tile_fetch_and_microcache_counters() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        image_from_fn(256, 256, 64, 3, PixelFormat::U8, &gradient_u8),
    );
    let cache = cache_with(&factory);

    let tile = cache.get_tile("a.tif", 0, 0, 0, 0).expect("tile");
    let stats = cache.statistics();
    assert_eq!(stats.find_tile_calls, 1);
    assert_eq!(stats.find_tile_microcache_misses, 1);
    assert_eq!(stats.find_tile_cache_misses, 1);
    cache.release_tile(tile);

    // Same tile again, same thread: the microcache serves it with neither
    // miss counter moving.
    let tile = cache.get_tile("a.tif", 0, 0, 0, 0).expect("tile");
    let stats = cache.statistics();
    assert_eq!(stats.find_tile_calls, 2);
    assert_eq!(stats.find_tile_microcache_misses, 1);
    assert_eq!(stats.find_tile_cache_misses, 1);
    cache.release_tile(tile);
}

#[test]
fn test_microcache_holds_two_tiles() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        image_from_fn(256, 256, 64, 1, PixelFormat::U8, &gradient_u8),
    );
    let cache = cache_with(&factory);

    // Alternate between two tiles: after each is fetched once, the two-slot
    // microcache absorbs every further lookup.
    for _ in 0..3 {
        let t0 = cache.get_tile("a.tif", 0, 0, 0, 0).expect("tile");
        cache.release_tile(t0);
        let t1 = cache.get_tile("a.tif", 0, 64, 0, 0).expect("tile");
        cache.release_tile(t1);
    }
    let stats = cache.statistics();
    assert_eq!(stats.find_tile_calls, 6);
    assert_eq!(stats.find_tile_microcache_misses, 2);
    assert_eq!(stats.find_tile_cache_misses, 2);
}

#[test]
fn test_get_tile_snaps_to_tile_origin() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        image_from_fn(256, 256, 64, 1, PixelFormat::U8, &gradient_u8),
    );
    let cache = cache_with(&factory);

    // (70, 5) lies in the tile at (64, 0); fetching by interior coordinates
    // and by origin is the same tile.
    let by_interior = cache.get_tile("a.tif", 0, 70, 5, 0).expect("tile");
    cache.release_tile(by_interior);
    let by_origin = cache.get_tile("a.tif", 0, 64, 0, 0).expect("tile");
    cache.release_tile(by_origin);
    let stats = cache.statistics();
    assert_eq!(stats.find_tile_cache_misses, 1);
}

#[test]
fn test_tile_pixels_content() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        constant_image(128, 128, 64, 3, PixelFormat::U8, 1.0),
    );
    let cache = cache_with(&factory);

    let tile = cache.get_tile("a.tif", 0, 0, 0, 0).expect("tile");
    assert!(tile.valid());
    let (pixels, format) = cache.tile_pixels(&tile);
    assert_eq!(format, PixelFormat::U8);
    assert_eq!(pixels.len(), 64 * 64 * 3);
    assert!(pixels.iter().all(|&b| b == 255));
    cache.release_tile(tile);
}

#[test]
fn test_get_pixels_values_and_roundtrip() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        image_from_fn(256, 256, 64, 3, PixelFormat::U8, &gradient_u8),
    );
    let cache = cache_with(&factory);

    // A region spanning a tile boundary.
    let (x0, x1, y0, y1) = (60, 70, 62, 66);
    let npixels = ((x1 - x0) * (y1 - y0)) as usize;
    let mut first = vec![0u8; npixels * 3 * 4];
    cache
        .get_pixels("a.tif", 0, x0, x1, y0, y1, 0, 1, PixelFormat::F32, &mut first)
        .unwrap();

    let mut values = vec![0f32; npixels * 3];
    bytes_to_f32_slice(&first, &mut values);
    let mut i = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            for c in 0..3 {
                let expected = gradient_u8(x, y, c);
                assert!(
                    (values[i] - expected).abs() < 1.0 / 255.0,
                    "pixel ({x}, {y}) channel {c}: got {}, expected {expected}",
                    values[i]
                );
                i += 1;
            }
        }
    }

    // Re-requesting the same region yields identical bytes.
    let mut second = vec![0u8; npixels * 3 * 4];
    cache
        .get_pixels("a.tif", 0, x0, x1, y0, y1, 0, 1, PixelFormat::F32, &mut second)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_get_pixels_read_failure_zero_fills_and_reports() {
    let factory = MockFactory::new();
    let mut image = constant_image(64, 64, 32, 1, PixelFormat::U8, 1.0);
    image.fail_reads = true;
    factory.add("flaky.tif", image);
    let cache = cache_with(&factory);

    let mut out = vec![0xAAu8; 16];
    let result = cache.get_pixels("flaky.tif", 0, 0, 4, 0, 4, 0, 1, PixelFormat::U8, &mut out);
    assert!(matches!(result, Err(CacheError::ReadFailed(_))));
    assert!(out.iter().all(|&b| b == 0), "pixels should be zero-filled");
}

#[test]
fn test_get_pixels_buffer_too_small() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        constant_image(64, 64, 32, 3, PixelFormat::U8, 0.5),
    );
    let cache = cache_with(&factory);

    let mut out = vec![0u8; 4];
    assert!(matches!(
        cache.get_pixels("a.tif", 0, 0, 8, 0, 8, 0, 1, PixelFormat::U8, &mut out),
        Err(CacheError::ReadFailed(_))
    ));
}

#[test]
fn test_tile_handle_survives_eviction() {
    let factory = MockFactory::new();
    factory.add(
        "a.tif",
        constant_image(512, 512, 64, 3, PixelFormat::U8, 1.0),
    );
    let cache = cache_with(&factory);
    // Budget of one tile: every new read evicts the previous one.
    cache.attribute(
        "max_memory_MB",
        AttrValue::Float((64 * 64 * 3 + 1024) as f32 / (1024.0 * 1024.0)),
    );

    let held = cache.get_tile("a.tif", 0, 0, 0, 0).expect("tile");
    for ty in 0..4 {
        for tx in 0..4 {
            let t = cache.get_tile("a.tif", 0, tx * 64, ty * 64, 0).expect("tile");
            cache.release_tile(t);
        }
    }
    // The held handle still reads its original pixels.
    let (pixels, _) = cache.tile_pixels(&held);
    assert!(pixels.iter().all(|&b| b == 255));
    cache.release_tile(held);
}

#[test]
fn test_get_tile_on_broken_file_is_none() {
    let factory = MockFactory::new();
    let mut image = constant_image(64, 64, 32, 1, PixelFormat::U8, 0.0);
    image.fail_open = true;
    factory.add("bad.tif", image);
    let cache = cache_with(&factory);

    assert!(cache.get_tile("bad.tif", 0, 0, 0, 0).is_none());
    assert!(!cache.geterror().is_empty());
}
