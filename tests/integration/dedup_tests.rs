//! Content-fingerprint deduplication of identical images opened under
//! different names.

use tilecache::{AttrValue, PixelFormat};

use super::test_utils::{cache_with, gradient_u8, image_from_fn, MockFactory};

const SHA: &str = "d3486ae9136e7856bc42212385ea797094475802";

#[test]
fn test_fingerprint_dedup_yields_one_canonical_record() {
    let factory = MockFactory::new();
    factory.add(
        "x.exr",
        image_from_fn(128, 128, 64, 3, PixelFormat::U8, &gradient_u8).with_fingerprint(SHA),
    );
    factory.add(
        "y.exr",
        image_from_fn(128, 128, 64, 3, PixelFormat::U8, &gradient_u8).with_fingerprint(SHA),
    );
    let cache = cache_with(&factory);

    cache.get_imagespec("x.exr", 0).unwrap();
    cache.get_imagespec("y.exr", 0).unwrap();

    // Both names were opened once to learn their fingerprints, but only one
    // record is canonical.
    assert_eq!(factory.open_count(), 2);
    assert_eq!(cache.statistics().unique_files, 1);

    let report = cache.getstats(2);
    assert!(report.contains("DUPLICATES"), "report: {report}");
}

#[test]
fn test_duplicate_names_share_tiles() {
    let factory = MockFactory::new();
    factory.add(
        "x.exr",
        image_from_fn(128, 128, 64, 3, PixelFormat::U8, &gradient_u8).with_fingerprint(SHA),
    );
    factory.add(
        "y.exr",
        image_from_fn(128, 128, 64, 3, PixelFormat::U8, &gradient_u8).with_fingerprint(SHA),
    );
    let cache = cache_with(&factory);

    let t = cache.get_tile("x.exr", 0, 0, 0, 0).expect("tile");
    cache.release_tile(t);
    assert_eq!(cache.statistics().find_tile_cache_misses, 1);

    // The duplicate name resolves to the canonical record, so its tile IDs
    // are the same and the read is already cached.
    let t = cache.get_tile("y.exr", 0, 0, 0, 0).expect("tile");
    cache.release_tile(t);
    assert_eq!(cache.statistics().find_tile_cache_misses, 1);
}

#[test]
fn test_dedup_requires_matching_sampling_metadata() {
    let factory = MockFactory::new();
    factory.add(
        "x.exr",
        image_from_fn(128, 128, 64, 3, PixelFormat::U8, &gradient_u8).with_fingerprint(SHA),
    );
    // Same pixels, same fingerprint, different wrap modes: sampling would
    // differ, so the records must stay separate.
    factory.add(
        "y.exr",
        image_from_fn(128, 128, 64, 3, PixelFormat::U8, &gradient_u8)
            .with_fingerprint(SHA)
            .with_attribute("wrapmodes", AttrValue::String("periodic,periodic".to_string())),
    );
    let cache = cache_with(&factory);

    cache.get_imagespec("x.exr", 0).unwrap();
    cache.get_imagespec("y.exr", 0).unwrap();
    assert_eq!(cache.statistics().unique_files, 2);
}

#[test]
fn test_different_fingerprints_stay_unique() {
    let factory = MockFactory::new();
    factory.add(
        "x.exr",
        image_from_fn(64, 64, 32, 1, PixelFormat::U8, &gradient_u8).with_fingerprint(SHA),
    );
    factory.add(
        "y.exr",
        image_from_fn(64, 64, 32, 1, PixelFormat::U8, &gradient_u8)
            .with_fingerprint("0000000000000000000000000000000000000000"),
    );
    let cache = cache_with(&factory);

    cache.get_imagespec("x.exr", 0).unwrap();
    cache.get_imagespec("y.exr", 0).unwrap();
    assert_eq!(cache.statistics().unique_files, 2);
}
