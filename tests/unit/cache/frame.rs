use std::sync::Arc;

use super::*;
use crate::entity::EntityOpts;
use crate::foundation::core::{Affine, Rect, Rgba8, ViewBox};
use crate::foundation::error::ErrorKind;
use crate::format::movie::{FramePose, MovieDescription, Shape, ShapeGeometry, ShapeStyle, SpriteTimeline};
use crate::render::surface_pool::SurfacePoolOpts;

fn square_movie(frames: u32) -> Arc<AnimationEntity> {
    let shape = Shape {
        geometry: ShapeGeometry::Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            corner_radius: 0.0,
        },
        style: ShapeStyle {
            fill: Some(Rgba8 {
                r: 0,
                g: 255,
                b: 0,
                a: 255,
            }),
            ..ShapeStyle::default()
        },
        transform: Affine::IDENTITY,
    };
    let pose = FramePose {
        alpha: 1.0,
        layout: Rect::new(0.0, 0.0, 10.0, 10.0),
        transform: Affine::IDENTITY,
        clip_path: None,
        shapes: Arc::from(vec![shape]),
    };
    let movie = MovieDescription {
        view_box: ViewBox::new(10.0, 10.0),
        fps: 10,
        frames,
        sprites: vec![SpriteTimeline {
            image_key: "square".to_string(),
            matte_key: None,
            frames: vec![pose; frames as usize],
        }],
        ..MovieDescription::default()
    };
    let e = Arc::new(AnimationEntity::new(movie, EntityOpts::default()));
    e.prepare(|| {});
    e
}

fn size() -> PixelSize {
    PixelSize::new(8, 8).unwrap()
}

fn cache_for_frames(n: usize) -> FrameRenderCache {
    FrameRenderCache::new(FrameCacheOpts {
        capacity_bytes: size().rgba8_len() * n,
        pool: SurfacePoolOpts::default(),
    })
}

#[test]
fn same_key_returns_same_buffer() {
    let e = square_movie(2);
    let cache = cache_for_frames(4);
    let key = RenderCacheKey::new(1, 0, size(), ScalePolicy::Fit);

    let a = cache.render_and_cache(&key, &e, None).unwrap();
    let b = cache.render_and_cache(&key, &e, None).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let stats = cache.stats();
    assert_eq!(stats.renders, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.bytes, size().rgba8_len());
    assert_eq!(a.pixel(4, 4), Some([0, 255, 0, 255]));
    assert_eq!(a.pixel(8, 0), None);
}

#[test]
fn concurrent_callers_share_one_render() {
    let e = square_movie(1);
    let cache = Arc::new(cache_for_frames(4));
    let key = RenderCacheKey::new(7, 0, size(), ScalePolicy::Fit);

    let frames: Vec<Arc<RenderedFrame>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let e = e.clone();
                s.spawn(move || cache.render_and_cache(&key, &e, None).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for f in &frames[1..] {
        assert!(Arc::ptr_eq(&frames[0], f));
    }
    assert_eq!(cache.stats().renders, 1);
}

#[test]
fn eviction_feeds_the_pool() {
    let e = square_movie(3);
    let cache = cache_for_frames(1);
    let k0 = RenderCacheKey::new(1, 0, size(), ScalePolicy::Fit);
    let k1 = RenderCacheKey::new(1, 1, size(), ScalePolicy::Fit);

    drop(cache.render_and_cache(&k0, &e, None).unwrap());
    drop(cache.render_and_cache(&k1, &e, None).unwrap());

    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.recycled, 1);
    assert_eq!(stats.pool.retained_surfaces, 1);
    assert!(cache.get(&k0).is_none());

    drop(cache.render_and_cache(&k0, &e, None).unwrap());
    let stats = cache.stats();
    assert_eq!(stats.pool.reused_surfaces, 1);
    assert!(stats.bytes <= cache.capacity_bytes());
}

#[test]
fn held_frames_survive_eviction() {
    let e = square_movie(2);
    let cache = cache_for_frames(1);
    let k0 = RenderCacheKey::new(1, 0, size(), ScalePolicy::Fit);
    let k1 = RenderCacheKey::new(1, 1, size(), ScalePolicy::Fit);

    let held = cache.render_and_cache(&k0, &e, None).unwrap();
    cache.render_and_cache(&k1, &e, None).unwrap();

    assert_eq!(cache.stats().recycled, 0);
    assert_eq!(held.pixel(1, 1), Some([0, 255, 0, 255]));
}

#[test]
fn dynamic_fingerprint_separates_entries() {
    let e = square_movie(1);
    let cache = cache_for_frames(4);
    let mut dynamic = DynamicEntity::default();
    dynamic.set_hidden("square", true);

    let plain = RenderCacheKey::new(1, 0, size(), ScalePolicy::Fit);
    let hidden = plain.with_dynamic(dynamic.fingerprint());
    assert_ne!(plain, hidden);

    let a = cache.render_and_cache(&plain, &e, None).unwrap();
    let b = cache.render_and_cache(&hidden, &e, Some(&dynamic)).unwrap();
    assert_eq!(a.pixel(4, 4), Some([0, 255, 0, 255]));
    assert_eq!(b.pixel(4, 4), Some([0, 0, 0, 0]));
    assert_eq!(cache.len(), 2);
}

#[test]
fn oversized_key_is_rejected_before_allocating() {
    let e = square_movie(1);
    let cache = cache_for_frames(4);
    let wide = PixelSize {
        width: 70_000,
        height: 1,
    };
    let key = RenderCacheKey::new(1, 0, wide, ScalePolicy::Fit);

    let err = cache.render_and_cache(&key, &e, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().pool.alloc_surfaces, 0);
}

#[test]
fn failed_render_returns_buffer_to_pool() {
    let e = square_movie(1);
    let cache = cache_for_frames(4);
    let key = RenderCacheKey::new(1, 5, size(), ScalePolicy::Fit);

    let err = cache.render_and_cache(&key, &e, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().pool.retained_surfaces, 1);
}

#[test]
fn remove_content_only_touches_that_content() {
    let e = square_movie(2);
    let cache = cache_for_frames(8);
    for content in [1, 2] {
        for frame in 0..2 {
            let key = RenderCacheKey::new(content, frame, size(), ScalePolicy::Fit);
            cache.render_and_cache(&key, &e, None).unwrap();
        }
    }

    cache.remove_content(1);
    assert_eq!(cache.len(), 2);
    assert!(cache.get(&RenderCacheKey::new(2, 1, size(), ScalePolicy::Fit)).is_some());
    assert_eq!(cache.stats().bytes, size().rgba8_len() * 2);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.stats().bytes, 0);
    cache.trim_pool();
    assert_eq!(cache.stats().pool.retained_surfaces, 0);
}

#[test]
fn straight_alpha_copy_unpremultiplies() {
    let e = square_movie(1);
    let cache = cache_for_frames(1);
    let key = RenderCacheKey::new(1, 0, size(), ScalePolicy::Fit);
    let frame = cache.render_and_cache(&key, &e, None).unwrap();

    let straight = frame.to_rgba8_straight();
    assert_eq!(straight.len(), frame.byte_len());
    assert_eq!(&straight[..4], &[0, 255, 0, 255]);
}
