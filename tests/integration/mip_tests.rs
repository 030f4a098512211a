//! MIP pyramids: real multi-subimage files and automip synthesis.

use std::sync::Arc;

use tilecache::pixel::bytes_to_f32_slice;
use tilecache::{AttrValue, CacheError, ImageCache, PixelFormat};

use super::test_utils::{
    cache_with, constant_image, image_from_fn, subimage_from_fn, MockFactory, TestImage,
};

fn automip_cache(factory: &Arc<MockFactory>) -> Arc<ImageCache> {
    let cache = cache_with(factory);
    cache.attribute("automip", AttrValue::Int(1));
    cache
}

#[test]
fn test_automip_synthesizes_pyramid_specs() {
    let factory = MockFactory::new();
    factory.add(
        "m.tif",
        image_from_fn(100, 100, 32, 3, PixelFormat::F32, &|x, y, c| {
            (x + y + c) as f32
        }),
    );
    let cache = automip_cache(&factory);

    // Ceiling halving: 100 -> 50 -> 25 -> 13 -> 7 -> 4 -> 2 -> 1.
    let level3 = cache.get_imagespec("m.tif", 3).unwrap();
    assert_eq!((level3.width, level3.height), (13, 13));
    let count = {
        let mut n = 0;
        while cache.get_imagespec("m.tif", n).is_ok() {
            n += 1;
        }
        n
    };
    assert_eq!(count, 8);
    // Every synthesized level carries power-of-two tile extents.
    for subimage in 0..count {
        let spec = cache.get_imagespec("m.tif", subimage).unwrap();
        assert!(spec.tile_width > 0 && (spec.tile_width & (spec.tile_width - 1)) == 0);
        assert!(spec.tile_height > 0 && (spec.tile_height & (spec.tile_height - 1)) == 0);
    }
}

#[test]
fn test_automip_level_is_box_average_of_finer_level() {
    let factory = MockFactory::new();
    // 8x8 single-channel float ramp: pixel value = x + 8*y.
    factory.add(
        "ramp.tif",
        image_from_fn(8, 8, 8, 1, PixelFormat::F32, &|x, y, _| (x + 8 * y) as f32),
    );
    let cache = automip_cache(&factory);

    let level1 = cache.get_imagespec("ramp.tif", 1).unwrap();
    assert_eq!((level1.width, level1.height), (4, 4));

    // For even dimensions the bilinear sample positions land exactly between
    // 2x2 blocks of the finer level, so each level-1 texel is their average.
    let mut bytes = vec![0u8; 16 * 4];
    cache
        .get_pixels("ramp.tif", 1, 0, 4, 0, 4, 0, 1, PixelFormat::F32, &mut bytes)
        .unwrap();
    let mut values = [0f32; 16];
    bytes_to_f32_slice(&bytes, &mut values);
    for j in 0..4 {
        for i in 0..4 {
            let expected = ((2 * i) as f32 + (2 * i + 1) as f32) / 2.0
                + 8.0 * ((2 * j) as f32 + (2 * j + 1) as f32) / 2.0;
            let got = values[(j * 4 + i) as usize];
            assert!(
                (got - expected).abs() < 1e-5,
                "level-1 texel ({i}, {j}): got {got}, expected {expected}"
            );
        }
    }
}

#[test]
fn test_automip_deep_level_of_constant_stays_constant() {
    let factory = MockFactory::new();
    factory.add(
        "flat.tif",
        constant_image(64, 64, 32, 3, PixelFormat::F32, 0.625),
    );
    let cache = automip_cache(&factory);

    // Level 3 is synthesized through three recursive bilerp passes; a
    // constant image must come through exactly.
    let mut bytes = vec![0u8; 8 * 8 * 3 * 4];
    cache
        .get_pixels("flat.tif", 3, 0, 8, 0, 8, 0, 1, PixelFormat::F32, &mut bytes)
        .unwrap();
    let mut values = vec![0f32; 8 * 8 * 3];
    bytes_to_f32_slice(&bytes, &mut values);
    for value in values {
        assert!((value - 0.625).abs() < 1e-5);
    }
}

#[test]
fn test_automip_respects_textureformat_tag() {
    let factory = MockFactory::new();
    factory.add(
        "authored.tif",
        constant_image(64, 64, 32, 1, PixelFormat::F32, 0.5).with_attribute(
            "textureformat",
            AttrValue::String("Plain Texture".to_string()),
        ),
    );
    let cache = automip_cache(&factory);

    // The tag says somebody built this as a texture and wants it exactly as
    // authored: no synthesized levels.
    cache.get_imagespec("authored.tif", 0).unwrap();
    assert!(matches!(
        cache.get_imagespec("authored.tif", 1),
        Err(CacheError::BadSubimage { .. })
    ));
}

#[test]
fn test_no_automip_without_attribute() {
    let factory = MockFactory::new();
    factory.add(
        "single.tif",
        constant_image(64, 64, 32, 1, PixelFormat::F32, 0.5),
    );
    let cache = cache_with(&factory);

    assert!(matches!(
        cache.get_imagespec("single.tif", 1),
        Err(CacheError::BadSubimage { .. })
    ));
}

#[test]
fn test_real_mip_file_reads_each_level() {
    let factory = MockFactory::new();
    // A file with two real levels holding different constants.
    let image = TestImage {
        subimages: vec![
            subimage_from_fn(64, 64, 32, 1, PixelFormat::F32, &|_, _, _| 0.25),
            subimage_from_fn(32, 32, 32, 1, PixelFormat::F32, &|_, _, _| 0.75),
        ],
        format_name: "mock",
        fail_open: false,
        fail_reads: false,
    };
    factory.add("mipped.tif", image);
    let cache = cache_with(&factory);

    let level1 = cache.get_imagespec("mipped.tif", 1).unwrap();
    assert_eq!((level1.width, level1.height), (32, 32));

    let mut bytes = vec![0u8; 4];
    cache
        .get_pixels("mipped.tif", 0, 5, 6, 5, 6, 0, 1, PixelFormat::F32, &mut bytes)
        .unwrap();
    let mut value = [0f32];
    bytes_to_f32_slice(&bytes, &mut value);
    assert_eq!(value[0], 0.25);

    cache
        .get_pixels("mipped.tif", 1, 5, 6, 5, 6, 0, 1, PixelFormat::F32, &mut bytes)
        .unwrap();
    bytes_to_f32_slice(&bytes, &mut value);
    assert_eq!(value[0], 0.75);
}
