use std::collections::HashSet;
use uuid::Uuid;

use crate::backend::testing::RecordingBackend;
use crate::backend::HitResult;
use crate::block_atlas::AtlasBlockManager;
use crate::config::{PageSettings, PoolSettings};
use crate::label::Bitmap;
use crate::pick;
use crate::pool_set::PoolSet;
use crate::utils::{InstanceRecord, Position};

fn set_with_capacity(capacity: usize) -> PoolSet {
    PoolSet::new(PoolSettings {
        group_capacity: capacity,
        max_groups: None,
    })
}

fn page_settings(items: usize) -> PageSettings {
    PageSettings {
        items_per_page: items,
        commands_per_page: 8,
        layers_per_page: 2,
        labels_per_layer: 8,
        atlas_extent: 256,
        label_tile: 64,
        max_pages: None,
    }
}

fn records(n: usize) -> Vec<InstanceRecord> {
    vec![InstanceRecord::identity(); n]
}

/// Every tag in the index points at an occupied slot carrying that tag,
/// and every occupied tagged slot is indexed.
fn assert_tag_index_consistent(set: &PoolSet) {
    let mut slot_tags = Vec::new();
    for group_index in 0..set.group_count() {
        let group = set.group(group_index).unwrap();
        for slot in 0..group.len() {
            if group.is_occupied(slot) {
                if let Some(tag) = group.tag_at(slot) {
                    slot_tags.push(tag);
                }
            }
        }
    }

    let indexed: Vec<Uuid> = slot_tags
        .iter()
        .copied()
        .filter(|tag| set.exists(tag))
        .collect();
    assert_eq!(
        indexed.len(),
        set.tag_count(),
        "index entries without a matching occupied slot"
    );
    // every occupied tagged slot is reachable, modulo deliberate
    // duplicate-tag shadowing, which this sequence never produces
    assert_eq!(slot_tags.len(), set.tag_count());
}

#[test]
fn tag_index_stays_consistent_across_mixed_operations() {
    let mut backend = RecordingBackend::new();
    let mut set = set_with_capacity(4);
    let tags: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();

    for (i, tag) in tags.iter().enumerate() {
        set.add(&mut backend, Some(*tag), None, InstanceRecord::identity())
            .unwrap();
        if i % 3 == 0 {
            set.advance_generation();
        }
    }
    assert_tag_index_consistent(&set);

    for tag in tags.iter().step_by(2) {
        assert!(set.remove(&mut backend, tag));
    }
    assert_tag_index_consistent(&set);

    // evict everything older than the current generation
    let current = set.generation();
    set.evict_below(&mut backend, current, &HashSet::new());
    assert_tag_index_consistent(&set);

    for _ in 0..4 {
        set.add(
            &mut backend,
            Some(Uuid::new_v4()),
            None,
            InstanceRecord::identity(),
        )
        .unwrap();
    }
    assert_tag_index_consistent(&set);
}

#[test]
fn tombstones_are_reused_before_any_growth() {
    let mut backend = RecordingBackend::new();
    let mut set = set_with_capacity(2);

    // fill group 0 entirely
    let first_tag = Uuid::new_v4();
    let first = set
        .add(&mut backend, Some(first_tag), None, InstanceRecord::identity())
        .unwrap();
    set.add(&mut backend, None, None, InstanceRecord::identity())
        .unwrap();
    assert_eq!(set.group_count(), 1);

    set.add(&mut backend, None, None, InstanceRecord::identity())
        .unwrap();
    assert_eq!(set.group_count(), 2);

    // a removal in group 0 must be reused before any third group appears
    assert!(set.remove(&mut backend, &first_tag));
    let insert = set
        .add(&mut backend, None, None, InstanceRecord::identity())
        .unwrap();
    assert_eq!((insert.group, insert.slot), (first.group, first.slot));
    assert_eq!(set.group_count(), 2);
}

#[test]
fn eviction_respects_keep_list_and_refreshes_it() {
    let mut backend = RecordingBackend::new();
    let mut set = set_with_capacity(8);
    let tags: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    // stamp generations 0, 1, 2, 3
    for (generation, tag) in tags.iter().enumerate() {
        while set.generation() < generation as u32 {
            set.advance_generation();
        }
        set.add(&mut backend, Some(*tag), None, InstanceRecord::identity())
            .unwrap();
    }
    while set.generation() < 5 {
        set.advance_generation();
    }

    // no keep-list: generations 0 and 1 fall below threshold 2
    let oldest = set.evict_below(&mut backend, 2, &HashSet::new());
    assert!(!set.exists(&tags[0]));
    assert!(!set.exists(&tags[1]));
    assert!(set.exists(&tags[2]));
    assert!(set.exists(&tags[3]));
    assert_eq!(oldest, 3); // generation 2 seen from generation 5

    // keep-listed tag is refreshed to the current generation and
    // survives sweeps whose threshold is far past its original stamp
    let keep: HashSet<Uuid> = [tags[2]].into_iter().collect();
    set.evict_below(&mut backend, 5, &keep);
    assert!(set.exists(&tags[2]));
    assert!(!set.exists(&tags[3]));

    while set.generation() < 9 {
        set.advance_generation();
    }
    set.evict_below(&mut backend, 8, &keep);
    assert!(set.exists(&tags[2]));

    // without the keep-list it finally ages out
    set.advance_generation();
    set.evict_below(&mut backend, set.generation(), &HashSet::new());
    assert!(!set.exists(&tags[2]));
}

#[test]
fn removes_are_idempotent_everywhere() {
    let mut backend = RecordingBackend::new();
    let mut set = set_with_capacity(4);
    let tag = Uuid::new_v4();

    set.add(&mut backend, Some(tag), None, InstanceRecord::identity())
        .unwrap();
    assert!(set.remove(&mut backend, &tag));
    assert!(!set.remove(&mut backend, &tag));

    let mut manager = AtlasBlockManager::new(page_settings(8));
    let batch_tag = Uuid::new_v4();
    manager
        .add_batch(&mut backend, batch_tag, &records(2), &records(2), &[])
        .unwrap();
    assert!(manager.remove(&mut backend, &batch_tag));
    assert!(!manager.remove(&mut backend, &batch_tag));
}

#[test]
fn batch_spanning_pages_sums_to_batch_length() {
    let mut backend = RecordingBackend::new();
    let mut manager = AtlasBlockManager::new(page_settings(4));

    let list = manager
        .add_batch(&mut backend, Uuid::new_v4(), &records(10), &records(10), &[])
        .unwrap();

    assert!(list.blocks.len() >= 2);
    assert_eq!(list.item_count(), 10);
    // 10 items over 4-item pages: exactly two page boundaries crossed
    assert_eq!(manager.page_count(), 3);
    assert_eq!(backend.bound.len(), 3);
}

#[test]
fn emptied_pages_detach_exactly_once() {
    let mut backend = RecordingBackend::new();
    let mut manager = AtlasBlockManager::new(page_settings(4));
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    manager
        .add_batch(&mut backend, a, &records(6), &records(6), &[])
        .unwrap();
    manager
        .add_batch(&mut backend, b, &records(2), &records(2), &[])
        .unwrap();
    assert_eq!(manager.page_count(), 2);

    // batch a spans pages 0 and 1; page 0 empties with it, page 1
    // still holds batch b
    assert!(manager.remove(&mut backend, &a));
    assert_eq!(backend.detached.len(), 1);

    assert!(manager.remove(&mut backend, &b));
    assert_eq!(backend.detached.len(), 2);
    assert_eq!(manager.active_page_count(), 0);
}

#[test]
fn picks_round_trip_through_the_block_history() {
    let mut backend = RecordingBackend::new();
    let mut manager = AtlasBlockManager::new(page_settings(4));
    let tag = Uuid::new_v4();

    // 10 items over 4-item pages: blocks of 4, 4, 2
    let list = manager
        .add_batch(&mut backend, tag, &records(10), &records(10), &[])
        .unwrap();
    let third = &list.blocks[2];

    let resolved = manager
        .resolve(third.page, third.draw_slot, 1)
        .expect("live block must resolve");
    assert_eq!(resolved.item_index, 4 + 4 + 1);
    assert_eq!(resolved.list.tag, tag);

    // hits flow through find() untouched and resolve the same way
    backend.hits = vec![HitResult {
        page: third.page,
        draw_slot: third.draw_slot,
        item: 1,
        depth: 0.25,
    }];
    let hits = manager.find(&backend, Position { x: 10.0, y: 20.0 }, 2.0);
    assert_eq!(hits.len(), 1);
    let resolved = pick::resolve_hit(manager.lists(), &hits[0]).unwrap();
    assert_eq!(resolved.item_index, 9);

    // after removal the same hit is stale and silently unresolved
    manager.remove(&mut backend, &tag);
    assert!(pick::resolve_hit(manager.lists(), &hits[0]).is_none());
}

#[test]
fn clear_resets_both_sides_fully() {
    let mut backend = RecordingBackend::new();
    let mut set = set_with_capacity(2);
    let mut manager = AtlasBlockManager::new(page_settings(4));
    let tags: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

    for tag in &tags {
        set.add(
            &mut backend,
            Some(*tag),
            Some(Bitmap::solid(2, 2, [9; 4])),
            InstanceRecord::identity(),
        )
        .unwrap();
        manager
            .add_batch(&mut backend, *tag, &records(3), &records(3), &[])
            .unwrap();
    }

    set.clear(&mut backend);
    manager.clear(&mut backend);

    for tag in &tags {
        assert!(!set.exists(tag));
        assert!(manager.resolve(0, 0, 0).is_none());
    }
    assert_eq!(set.live_count(), 0);
    assert_eq!(manager.live_items(), 0);

    let insert = set
        .add(&mut backend, Some(tags[0]), None, InstanceRecord::identity())
        .unwrap();
    assert_eq!((insert.group, insert.slot), (0, 0));
    let list = manager
        .add_batch(&mut backend, tags[0], &records(1), &records(1), &[])
        .unwrap();
    assert_eq!(list.blocks[0].page, 0);
}
