use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::backend::{DrawBinding, RenderBackend};
use crate::config::PoolSettings;
use crate::error::PoolError;
use crate::label::Bitmap;
use crate::slot_pool::{SlotPool, GENERATION_EMPTY};
use crate::utils::InstanceRecord;

/// Where an insert landed: the group, the slot within it, and how many
/// live items that group holds afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInsert {
    pub group: usize,
    pub slot: usize,
    pub live_in_group: usize,
}

/// An unbounded, lazily growing collection of [`SlotPool`] groups that
/// share one capacity, plus the tag → (group, slot) index.
///
/// Groups are created on demand and never removed; their slot indices
/// and group indices are baked into draw bindings and caller handles,
/// so slots are recycled in place instead. (The atlas manager retires
/// emptied pages; the asymmetry is deliberate — see DESIGN.md.)
pub struct PoolSet {
    groups: Vec<SlotPool>,
    tag_index: HashMap<Uuid, (usize, usize)>,
    settings: PoolSettings,
    current_generation: u32,
    disposed: bool,
}

impl PoolSet {
    pub fn new(settings: PoolSettings) -> Self {
        PoolSet {
            groups: Vec::new(),
            tag_index: HashMap::new(),
            settings,
            current_generation: 0,
            disposed: false,
        }
    }

    /// Inserts into the first group with a free slot, creating a new
    /// group (and firing its draw binding) when none has room.
    ///
    /// A duplicate tag silently overwrites the index entry; the earlier
    /// item stays in its slot, unreachable by tag, until eviction
    /// collects it.
    pub fn add<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        tag: Option<Uuid>,
        payload: Option<Bitmap>,
        record: InstanceRecord,
    ) -> Result<PoolInsert, PoolError> {
        debug_assert!(!self.disposed, "add on a disposed set");

        let group = match self.groups.iter().position(|g| g.free_count() > 0) {
            Some(group) => group,
            None => self.create_group(backend)?,
        };

        let slot = self.groups[group].add(
            backend,
            tag,
            payload,
            record,
            self.current_generation,
        )?;

        if let Some(tag) = tag {
            if let Some(previous) = self.tag_index.insert(tag, (group, slot)) {
                log::debug!(
                    "tag {tag} re-added; previous item at group {} slot {} is now unreachable by tag",
                    previous.0,
                    previous.1
                );
            }
        }

        Ok(PoolInsert {
            group,
            slot,
            live_in_group: self.groups[group].live_count(),
        })
    }

    fn create_group<B: RenderBackend>(&mut self, backend: &mut B) -> Result<usize, PoolError> {
        if let Some(max_groups) = self.settings.max_groups {
            if self.groups.len() >= max_groups {
                return Err(PoolError::SetExhausted { max_groups });
            }
        }

        let group = self.groups.len();
        let pool = SlotPool::new(backend, self.settings.group_capacity);
        backend.bind_draw(DrawBinding::Group {
            group,
            instances: pool.buffer(),
        });
        log::debug!(
            "created group {group} (capacity {})",
            self.settings.group_capacity
        );
        self.groups.push(pool);
        Ok(group)
    }

    /// Removes the item under `tag`. False for unknown tags.
    pub fn remove<B: RenderBackend>(&mut self, backend: &mut B, tag: &Uuid) -> bool {
        debug_assert!(!self.disposed, "remove on a disposed set");

        match self.tag_index.remove(tag) {
            Some((group, slot)) => self.groups[group].remove_at(backend, slot),
            None => false,
        }
    }

    /// The record under `tag`, or the sentinel for unknown tags.
    pub fn get(&self, tag: &Uuid) -> InstanceRecord {
        match self.tag_index.get(tag) {
            Some(&(group, slot)) => self.groups[group].get_record(slot),
            None => InstanceRecord::SENTINEL,
        }
    }

    pub fn set_aux<B: RenderBackend>(&mut self, backend: &mut B, tag: &Uuid, value: u32) -> bool {
        match self.tag_index.get(tag) {
            Some(&(group, slot)) => self.groups[group].set_aux(backend, slot, value),
            None => false,
        }
    }

    pub fn exists(&self, tag: &Uuid) -> bool {
        self.tag_index.contains_key(tag)
    }

    /// Moves the item under `old_tag` to `new_tag`. False if `old_tag`
    /// is unknown. A live `new_tag` is overwritten, same as in `add`.
    pub fn relabel(&mut self, old_tag: &Uuid, new_tag: Uuid) -> bool {
        let Some((group, slot)) = self.tag_index.remove(old_tag) else {
            return false;
        };
        self.groups[group].relabel(slot, Some(new_tag));
        if let Some(previous) = self.tag_index.insert(new_tag, (group, slot)) {
            log::debug!(
                "relabel to {new_tag} displaced item at group {} slot {}",
                previous.0,
                previous.1
            );
        }
        true
    }

    /// Sweeps every group, evicting slots strictly older than
    /// `threshold` and refreshing keep-listed tags to the current
    /// generation. Returns the maximum surviving age across all groups.
    pub fn evict_below<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        threshold: u32,
        keep: &HashSet<Uuid>,
    ) -> u32 {
        debug_assert!(!self.disposed, "evict_below on a disposed set");

        let current = self.current_generation;
        let mut oldest = 0u32;
        for (group_index, group) in self.groups.iter_mut().enumerate() {
            let age = group.evict_below(
                backend,
                group_index,
                threshold,
                current,
                &mut self.tag_index,
                keep,
            );
            oldest = oldest.max(age);
        }
        log::trace!("evict_below {threshold}: oldest surviving age {oldest}");
        oldest
    }

    /// Advances the per-frame generation counter, wrapping past the
    /// empty sentinel, and returns the new value.
    pub fn advance_generation(&mut self) -> u32 {
        self.current_generation = self.current_generation.wrapping_add(1);
        if self.current_generation == GENERATION_EMPTY {
            self.current_generation = 0;
        }
        self.current_generation
    }

    pub fn generation(&self) -> u32 {
        self.current_generation
    }

    /// Clears every group and drops the whole tag index.
    pub fn clear<B: RenderBackend>(&mut self, backend: &mut B) {
        for group in &mut self.groups {
            group.clear(backend);
        }
        self.tag_index = HashMap::new();
    }

    /// Disposes every group. Safe to call twice; all handles are
    /// invalid afterwards.
    pub fn dispose<B: RenderBackend>(&mut self, backend: &mut B) {
        if self.disposed {
            return;
        }
        for group in &mut self.groups {
            group.dispose(backend);
        }
        self.tag_index = HashMap::new();
        self.disposed = true;
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, index: usize) -> Option<&SlotPool> {
        self.groups.get(index)
    }

    /// Live items across all groups.
    pub fn live_count(&self) -> usize {
        self.groups.iter().map(|g| g.live_count()).sum()
    }

    pub fn tag_count(&self) -> usize {
        self.tag_index.len()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;

    fn small_set(capacity: usize) -> PoolSet {
        PoolSet::new(PoolSettings {
            group_capacity: capacity,
            max_groups: None,
        })
    }

    #[test]
    fn add_creates_groups_on_demand_and_binds_them() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(2);

        for _ in 0..3 {
            set.add(&mut backend, None, None, InstanceRecord::identity())
                .unwrap();
        }

        assert_eq!(set.group_count(), 2);
        assert_eq!(backend.bound.len(), 2);
        assert!(matches!(backend.bound[0], DrawBinding::Group { group: 0, .. }));
        assert!(matches!(backend.bound[1], DrawBinding::Group { group: 1, .. }));
    }

    #[test]
    fn growth_cap_is_surfaced_as_exhaustion() {
        let mut backend = RecordingBackend::new();
        let mut set = PoolSet::new(PoolSettings {
            group_capacity: 1,
            max_groups: Some(1),
        });

        set.add(&mut backend, None, None, InstanceRecord::identity())
            .unwrap();
        let err = set
            .add(&mut backend, None, None, InstanceRecord::identity())
            .unwrap_err();
        assert!(matches!(err, PoolError::SetExhausted { max_groups: 1 }));
    }

    #[test]
    fn remove_then_add_reuses_the_slot() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(2);
        let tag = Uuid::new_v4();

        set.add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();
        set.add(&mut backend, None, None, InstanceRecord::identity())
            .unwrap();
        assert!(set.remove(&mut backend, &tag));

        let insert = set
            .add(&mut backend, None, None, InstanceRecord::identity())
            .unwrap();
        assert_eq!((insert.group, insert.slot), (0, 0));
        assert_eq!(set.group_count(), 1);
    }

    #[test]
    fn duplicate_tag_overwrites_index_silently() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(4);
        let tag = Uuid::new_v4();

        let first = set
            .add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();
        let second = set
            .add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();

        assert_ne!(first.slot, second.slot);
        // both slots live, only the second reachable by tag
        assert_eq!(set.live_count(), 2);
        assert_eq!(set.get(&tag).slot_self, second.slot as u32);

        assert!(set.remove(&mut backend, &tag));
        assert!(!set.exists(&tag));
        assert_eq!(set.live_count(), 1);
    }

    #[test]
    fn evicting_a_shadowed_duplicate_keeps_the_live_index_entry() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(4);
        let tag = Uuid::new_v4();

        set.add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();
        set.advance_generation();
        let second = set
            .add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();
        set.advance_generation();

        // evict strictly older than generation 1: only the shadowed
        // first item goes, and the index keeps pointing at the second
        set.evict_below(&mut backend, 1, &HashSet::new());
        assert!(set.exists(&tag));
        assert_eq!(set.get(&tag).slot_self, second.slot as u32);
        assert_eq!(set.live_count(), 1);
    }

    #[test]
    fn get_and_set_aux_miss_softly() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(2);
        let unknown = Uuid::new_v4();

        assert!(set.get(&unknown).is_sentinel());
        assert!(!set.set_aux(&mut backend, &unknown, 1));
        assert!(!set.exists(&unknown));
        assert!(!set.remove(&mut backend, &unknown));
    }

    #[test]
    fn relabel_moves_the_index_entry() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(2);
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        set.add(&mut backend, Some(old), None, InstanceRecord::identity())
            .unwrap();
        assert!(set.relabel(&old, new));
        assert!(!set.exists(&old));
        assert!(set.exists(&new));
        assert!(!set.relabel(&old, new));
    }

    #[test]
    fn generation_advance_skips_the_empty_sentinel() {
        let mut set = small_set(1);
        set.current_generation = GENERATION_EMPTY - 1;
        assert_eq!(set.advance_generation(), 0);
    }

    #[test]
    fn clear_resets_fully() {
        let mut backend = RecordingBackend::new();
        let mut set = small_set(2);
        let tag = Uuid::new_v4();

        set.add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();
        set.clear(&mut backend);

        assert!(!set.exists(&tag));
        assert_eq!(set.live_count(), 0);
        let insert = set
            .add(&mut backend, Some(tag), None, InstanceRecord::identity())
            .unwrap();
        assert_eq!((insert.group, insert.slot), (0, 0));
        assert!(set.exists(&tag));
    }
}
