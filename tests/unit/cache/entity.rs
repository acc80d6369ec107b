use super::*;
use crate::entity::EntityOpts;
use crate::format::movie::MovieDescription;

fn opts(capacity_bytes: usize) -> EntityCacheOpts {
    EntityCacheOpts {
        capacity_bytes,
        floor_weight_bytes: 1024,
    }
}

fn empty_entity(key: &str) -> Arc<AnimationEntity> {
    Arc::new(AnimationEntity::new(
        MovieDescription::default(),
        EntityOpts {
            cache_key: key.to_string(),
            ..EntityOpts::default()
        },
    ))
}

#[test]
fn empty_entities_weigh_the_floor() {
    let cache = EntityCache::new(opts(10 * 1024));
    cache.put("a", empty_entity("a"));
    assert_eq!(cache.weight_bytes(), 1024);
    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());

    let st = cache.stats();
    assert_eq!((st.hits, st.misses, st.entries), (1, 1, 1));
}

#[test]
fn configured_floor_sets_the_charged_weight() {
    let cache = EntityCache::new(EntityCacheOpts {
        capacity_bytes: 64 * 1024,
        floor_weight_bytes: 4096,
    });
    let e = empty_entity("a");
    cache.put("a", Arc::clone(&e));
    assert_eq!(cache.weight_bytes(), e.weight_bytes(4096));
    assert_eq!(cache.weight_bytes(), 4096);
}

#[test]
fn eviction_is_least_recently_used_first() {
    let cache = EntityCache::new(opts(3 * 1024));
    cache.put("a", empty_entity("a"));
    cache.put("b", empty_entity("b"));
    cache.put("c", empty_entity("c"));
    assert!(cache.get("a").is_some());

    let evicted = cache.put("d", empty_entity("d"));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].0, "b");
    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert_eq!(cache.weight_bytes(), 3 * 1024);
}

#[test]
fn budget_holds_after_any_put_sequence() {
    let cache = EntityCache::new(opts(5 * 1024));
    let mut rng = fastrand::Rng::with_seed(7);
    for i in 0..200 {
        let key = format!("k{}", rng.usize(0..12));
        if i % 5 == 0 {
            let _ = cache.get(&key);
        }
        cache.put(key.clone(), empty_entity(&key));
        assert!(cache.weight_bytes() <= cache.capacity_bytes());
        assert!(cache.len() <= 5);
    }
}

#[test]
fn replacing_a_key_does_not_double_count() {
    let cache = EntityCache::new(opts(10 * 1024));
    cache.put("a", empty_entity("a"));
    cache.put("a", empty_entity("a"));
    assert_eq!(cache.weight_bytes(), 1024);
    assert_eq!(cache.len(), 1);
}

#[test]
fn oversized_entries_do_not_stay() {
    let cache = EntityCache::new(opts(512));
    let e = empty_entity("big");
    let evicted = cache.put("big", e.clone());
    assert_eq!(evicted.len(), 1);
    assert!(cache.is_empty());
    // Eviction does not dispose.
    assert!(!e.is_cleared());
}

#[test]
fn remove_and_clear_all_reset_weight() {
    let cache = EntityCache::new(opts(10 * 1024));
    cache.put("a", empty_entity("a"));
    cache.put("b", empty_entity("b"));
    assert!(cache.remove("a").is_some());
    assert!(cache.remove("a").is_none());
    assert_eq!(cache.weight_bytes(), 1024);
    cache.clear_all();
    assert_eq!(cache.weight_bytes(), 0);
    assert!(cache.is_empty());
}
